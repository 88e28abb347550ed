use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

lazy_static::lazy_static! {
  static ref NEXT_GROUP_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A type-erased task, for callers that build their work up front.
/// It must be `Send` and `'static`, and resolve to `Ok(())` or a task error `E`.
pub type BoxedTask<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'static>>;

/// Lifecycle of a `WorkGroup`'s outcome aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GroupPhase {
  /// Accepting submissions; no `wait()` has been issued yet.
  Open = 0,
  /// A `wait()` call is blocked until every pending task completes.
  Draining = 1,
  /// A `wait()` call observed zero pending tasks and returned.
  Done = 2,
}

impl GroupPhase {
  pub(crate) fn from_u8(raw: u8) -> Self {
    match raw {
      0 => GroupPhase::Open,
      1 => GroupPhase::Draining,
      _ => GroupPhase::Done,
    }
  }
}

pub(crate) fn next_task_id() -> u64 {
  NEXT_GROUP_TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}
