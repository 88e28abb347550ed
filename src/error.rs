use thiserror::Error;

/// Errors returned when acquiring capacity from a `WorkGroup`.
///
/// These are reported only to the caller that attempted the acquisition; they
/// never affect other waiters or the group's recorded task failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
  /// The requested weight is zero or larger than the whole pool, so it could never be granted.
  #[error("Requested weight {requested} can never be granted by a pool of capacity {capacity}")]
  InvalidWeight { requested: u64, capacity: u64 },

  #[error("Acquisition was cancelled before capacity became available")]
  Cancelled,

  #[error("Deadline elapsed before capacity became available")]
  DeadlineExceeded,
}

impl AcquireError {
  /// Returns a short stable label (snake_case) for use in logs.
  pub fn as_label(&self) -> &'static str {
    match self {
      AcquireError::InvalidWeight { .. } => "acquire_invalid_weight",
      AcquireError::Cancelled => "acquire_cancelled",
      AcquireError::DeadlineExceeded => "acquire_deadline_exceeded",
    }
  }
}
