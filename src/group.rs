use crate::config::{GroupConfig, GroupMode};
use crate::error::AcquireError;
use crate::limiter::WeightedLimiter;
use crate::outcome::OutcomeAggregator;
use crate::permit::Permit;
use crate::task::GroupPhase;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A bounded task group: a weighted capacity limiter fused with first-failure
/// aggregation.
///
/// Cloning is cheap and every clone refers to the same group, so tasks can hold
/// a clone to release capacity or to watch the group's cancellation token.
///
/// Capacity and task submission are decoupled. The usual pattern is to acquire
/// right before `go` and release when the task ends:
///
/// ```
/// use bounded_workgroup::WorkGroup;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group = WorkGroup::<String>::new(2);
/// for i in 0..4 {
///   let permit = group.acquire_permit(1).await.unwrap();
///   group.go(async move {
///     let _permit = permit;
///     if i == 3 { Err(format!("job {i} failed")) } else { Ok(()) }
///   });
/// }
/// assert_eq!(group.wait().await, Err("job 3 failed".to_string()));
/// # }
/// ```
pub struct WorkGroup<E> {
  inner: Arc<GroupInner<E>>,
}

struct GroupInner<E> {
  name: Arc<String>,
  limiter: Arc<WeightedLimiter>,
  outcome: Arc<OutcomeAggregator<E>>,
  token: CancellationToken,
  linked: bool,
  runtime: Option<TokioHandle>,
}

impl<E> Clone for WorkGroup<E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<E: Send + 'static> fmt::Debug for WorkGroup<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkGroup")
      .field("name", &self.inner.name)
      .field("linked", &self.inner.linked)
      .field("capacity", &self.capacity())
      .field("available", &self.available())
      .field("pending", &self.pending())
      .field("phase", &self.phase())
      .finish_non_exhaustive()
  }
}

impl<E: Send + 'static> WorkGroup<E> {
  /// Creates a group whose task failures do not affect sibling tasks.
  pub fn new(limit: u64) -> Self {
    Self::from_config(GroupConfig::default().with_limit(limit), GroupMode::Independent)
  }

  /// Creates a group whose token is cancelled when `parent` is, when any task
  /// fails, or once `wait()` returns.
  pub fn with_cancellation(parent: &CancellationToken, limit: u64) -> Self {
    Self::from_config(
      GroupConfig::default().with_limit(limit),
      GroupMode::Linked(parent.clone()),
    )
  }

  pub fn from_config(config: GroupConfig, mode: GroupMode) -> Self {
    let name = Arc::new(config.name);
    let limit = if config.limit == 0 {
      warn!(group = %*name, "Work group limit of 0 would never admit any work. Using 1.");
      1
    } else {
      config.limit
    };

    let (token, cancel_on_failure) = match mode {
      // Nothing ever cancels this token while tasks run.
      GroupMode::Independent => (CancellationToken::new(), None),
      GroupMode::Linked(parent) => {
        let token = parent.child_token();
        (token.clone(), Some(token))
      }
    };
    let linked = cancel_on_failure.is_some();
    debug!(group = %*name, limit, linked, "Work group created.");

    Self {
      inner: Arc::new(GroupInner {
        limiter: Arc::new(WeightedLimiter::new(limit, name.clone())),
        outcome: Arc::new(OutcomeAggregator::new(name.clone(), cancel_on_failure)),
        name,
        token,
        linked,
        runtime: config.runtime,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Returns `true` if task failures cancel the group.
  pub fn is_linked(&self) -> bool {
    self.inner.linked
  }

  /// Total weight of the capacity pool.
  pub fn capacity(&self) -> u64 {
    self.inner.limiter.capacity()
  }

  /// Weight that is currently unacquired.
  pub fn available(&self) -> u64 {
    self.inner.limiter.available()
  }

  /// Number of acquisitions currently queued for capacity.
  pub fn waiting(&self) -> usize {
    self.inner.limiter.waiting()
  }

  /// Number of submitted tasks that have not completed yet.
  pub fn pending(&self) -> usize {
    self.inner.outcome.pending()
  }

  pub fn phase(&self) -> GroupPhase {
    self.inner.outcome.phase()
  }

  /// Returns a clone of the group's token. Tasks should check it at their own
  /// cooperative points; the group never interrupts a running task.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.inner.token.clone()
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.token.is_cancelled()
  }

  /// Waits for `weight` units of capacity, observing the group's token.
  ///
  /// # Errors
  /// Returns `AcquireError::InvalidWeight` immediately if `weight` is zero or exceeds the capacity.
  /// Returns `AcquireError::Cancelled` if the group was cancelled before capacity became available.
  pub async fn acquire(&self, weight: u64) -> Result<(), AcquireError> {
    self.inner.limiter.acquire(weight, &self.inner.token, None).await
  }

  /// Waits for `weight` units of capacity, observing only `cancel`.
  pub async fn acquire_with_token(
    &self,
    weight: u64,
    cancel: &CancellationToken,
  ) -> Result<(), AcquireError> {
    self.inner.limiter.acquire(weight, cancel, None).await
  }

  /// Waits for `weight` units of capacity until `cancel` fires or `deadline` passes.
  ///
  /// # Errors
  /// Returns `AcquireError::DeadlineExceeded` if the deadline passed first. Nothing is acquired in
  /// that case.
  pub async fn acquire_with_deadline(
    &self,
    weight: u64,
    cancel: &CancellationToken,
    deadline: Instant,
  ) -> Result<(), AcquireError> {
    self.inner.limiter.acquire(weight, cancel, Some(deadline)).await
  }

  /// Acquires `weight` units without waiting. Returns `false`, with no side
  /// effect, if they are not available or other acquisitions are queued.
  pub fn try_acquire(&self, weight: u64) -> bool {
    self.inner.limiter.try_acquire(weight)
  }

  /// Returns `weight` units previously acquired with `acquire*` or `try_acquire`.
  pub fn release(&self, weight: u64) {
    self.inner.limiter.release(weight)
  }

  /// Like [`acquire`](Self::acquire), but the capacity is released when the returned permit drops.
  pub async fn acquire_permit(&self, weight: u64) -> Result<Permit, AcquireError> {
    self.acquire(weight).await?;
    Ok(Permit::new(self.inner.limiter.clone(), weight))
  }

  pub async fn acquire_permit_with_deadline(
    &self,
    weight: u64,
    cancel: &CancellationToken,
    deadline: Instant,
  ) -> Result<Permit, AcquireError> {
    self.acquire_with_deadline(weight, cancel, deadline).await?;
    Ok(Permit::new(self.inner.limiter.clone(), weight))
  }

  pub fn try_acquire_permit(&self, weight: u64) -> Option<Permit> {
    self
      .try_acquire(weight)
      .then(|| Permit::new(self.inner.limiter.clone(), weight))
  }

  /// Runs `task` concurrently with every other task of the group. Never blocks.
  ///
  /// If this is the first task to fail, its error is what `wait()` returns and,
  /// in linked mode, the group token is cancelled.
  pub fn go<F>(&self, task: F)
  where
    F: Future<Output = Result<(), E>> + Send + 'static,
  {
    self.inner.outcome.spawn(self.inner.runtime.as_ref(), task);
  }

  /// Waits until every submitted task has completed and returns the first failure.
  ///
  /// In linked mode the group token is cancelled before this returns. If the
  /// first failure was a panic, the panic is resumed here.
  ///
  /// The failure is handed out once: a later or overlapping `wait()` returns
  /// `Ok(())` unless a task submitted afterwards fails. Callers that need the
  /// error in several places should keep the value returned here.
  pub async fn wait(&self) -> Result<(), E> {
    self.inner.outcome.wait().await
  }
}
