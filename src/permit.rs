use crate::limiter::WeightedLimiter;

use std::sync::Arc;

/// Capacity acquired from a `WorkGroup`, released when dropped.
///
/// Moving a permit into a task ties the capacity to the task's lifetime, so it
/// is returned even if the task exits early through `?` or panics.
#[derive(Debug)]
#[must_use = "dropping a permit immediately releases its capacity"]
pub struct Permit {
  limiter: Arc<WeightedLimiter>,
  weight: u64,
}

impl Permit {
  pub(crate) fn new(limiter: Arc<WeightedLimiter>, weight: u64) -> Self {
    Self { limiter, weight }
  }

  /// Returns the weight this permit holds.
  pub fn weight(&self) -> u64 {
    self.weight
  }

  /// Consumes the permit without releasing its capacity.
  ///
  /// The returned weight stays acquired; hand it back with `WorkGroup::release`.
  pub fn forget(mut self) -> u64 {
    std::mem::take(&mut self.weight)
  }
}

impl Drop for Permit {
  fn drop(&mut self) {
    if self.weight > 0 {
      tracing::trace!(weight = self.weight, "Permit dropped. Releasing capacity.");
      self.limiter.release(self.weight);
    }
  }
}
