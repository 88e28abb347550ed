use crate::error::AcquireError;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// A queued acquisition request. It is woken only once its full weight has
/// been deducted from the pool on its behalf.
struct Waiter {
  id: u64,
  weight: u64,
  wake: oneshot::Sender<()>,
}

struct LimiterState {
  available: u64,
  waiters: VecDeque<Waiter>,
  next_waiter_id: u64,
}

impl LimiterState {
  /// Grants weight to waiters at the head of the queue, in arrival order,
  /// for as long as the head fits in what is available. Returns how many were woken.
  fn notify_waiters(&mut self) -> usize {
    let mut woken = 0;
    while self.waiters.front().is_some_and(|w| w.weight <= self.available) {
      let Some(waiter) = self.waiters.pop_front() else {
        break;
      };
      self.available -= waiter.weight;
      // A closed receiver means the acquire future is being dropped; its
      // guard will find the waiter gone and hand the weight back.
      let _ = waiter.wake.send(());
      woken += 1;
    }
    woken
  }
}

/// A weighted counting permit pool with a FIFO wait queue.
///
/// New arrivals never overtake queued waiters, so a large request at the head
/// of the queue is not starved by a stream of small ones.
pub(crate) struct WeightedLimiter {
  name: Arc<String>,
  capacity: u64,
  state: Mutex<LimiterState>,
}

impl fmt::Debug for WeightedLimiter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("WeightedLimiter")
      .field("name", &self.name)
      .field("capacity", &self.capacity)
      .field("available", &state.available)
      .field("waiting", &state.waiters.len())
      .finish()
  }
}

impl WeightedLimiter {
  pub(crate) fn new(capacity: u64, name: Arc<String>) -> Self {
    Self {
      name,
      capacity,
      state: Mutex::new(LimiterState {
        available: capacity,
        waiters: VecDeque::new(),
        next_waiter_id: 0,
      }),
    }
  }

  pub(crate) fn capacity(&self) -> u64 {
    self.capacity
  }

  pub(crate) fn available(&self) -> u64 {
    self.state.lock().available
  }

  /// Number of acquisition requests currently queued.
  pub(crate) fn waiting(&self) -> usize {
    self.state.lock().waiters.len()
  }

  fn check_weight(&self, weight: u64) -> Result<(), AcquireError> {
    if weight == 0 || weight > self.capacity {
      return Err(AcquireError::InvalidWeight {
        requested: weight,
        capacity: self.capacity,
      });
    }
    Ok(())
  }

  /// Waits until `weight` units can be deducted in one piece.
  ///
  /// Fails with `Cancelled` or `DeadlineExceeded` if `cancel` fires or
  /// `deadline` passes first; in that case nothing stays acquired, even if the
  /// grant raced with the cancellation. Dropping the returned future has the
  /// same effect.
  pub(crate) async fn acquire(
    &self,
    weight: u64,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
  ) -> Result<(), AcquireError> {
    self.check_weight(weight)?;
    if cancel.is_cancelled() {
      return Err(AcquireError::Cancelled);
    }
    if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
      return Err(AcquireError::DeadlineExceeded);
    }

    let (waiter_id, granted_rx) = {
      let mut state = self.state.lock();
      if state.waiters.is_empty() && state.available >= weight {
        state.available -= weight;
        trace!(limiter = %*self.name, weight, available = state.available, "Acquired capacity without waiting.");
        return Ok(());
      }

      let (wake, granted_rx) = oneshot::channel();
      let waiter_id = state.next_waiter_id;
      state.next_waiter_id = state.next_waiter_id.wrapping_add(1);
      state.waiters.push_back(Waiter {
        id: waiter_id,
        weight,
        wake,
      });
      trace!(
        limiter = %*self.name,
        waiter_id,
        weight,
        available = state.available,
        queued = state.waiters.len(),
        "Insufficient capacity. Queued waiter."
      );
      (waiter_id, granted_rx)
    };

    let mut queued = QueuedAcquire {
      limiter: self,
      waiter_id,
      weight,
      settled: false,
    };

    let outcome = tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(AcquireError::Cancelled),
      _ = deadline_elapsed(deadline) => Err(AcquireError::DeadlineExceeded),
      granted = granted_rx => match granted {
        Ok(()) => Ok(()),
        // The wake handle is only dropped unsent while this future is alive if
        // the limiter itself is torn down.
        Err(_) => Err(AcquireError::Cancelled),
      },
    };

    match &outcome {
      Ok(()) => {
        queued.settled = true;
        trace!(limiter = %*self.name, waiter_id, weight, "Waiter granted capacity.");
      }
      Err(err) => {
        trace!(limiter = %*self.name, waiter_id, weight, reason = err.as_label(), "Waiter gave up.");
      }
    }
    outcome
  }

  /// Deducts `weight` only if it is available right now and nobody is queued.
  pub(crate) fn try_acquire(&self, weight: u64) -> bool {
    if self.check_weight(weight).is_err() {
      return false;
    }
    let mut state = self.state.lock();
    if state.waiters.is_empty() && state.available >= weight {
      state.available -= weight;
      true
    } else {
      false
    }
  }

  /// Returns `weight` units to the pool and wakes every head-of-queue waiter
  /// that now fits.
  pub(crate) fn release(&self, weight: u64) {
    if weight == 0 {
      return;
    }
    let mut state = self.state.lock();
    state.available = state.available.saturating_add(weight);
    if state.available > self.capacity {
      warn!(
        limiter = %*self.name,
        weight,
        available = state.available,
        capacity = self.capacity,
        "Released more capacity than was acquired."
      );
    }
    let woken = state.notify_waiters();
    trace!(limiter = %*self.name, weight, woken, available = state.available, "Released capacity.");
  }

  /// Removes a waiter that stopped waiting. If it was granted in the meantime,
  /// its weight goes back to the pool.
  fn abandon(&self, waiter_id: u64, weight: u64) {
    let mut state = self.state.lock();
    match state.waiters.iter().position(|w| w.id == waiter_id) {
      Some(position) => {
        state.waiters.remove(position);
        // The head may have been blocking smaller waiters behind it.
        if position == 0 && state.available > 0 {
          state.notify_waiters();
        }
      }
      None => {
        state.available = state.available.saturating_add(weight);
        state.notify_waiters();
      }
    }
  }
}

/// Cleans up a queued waiter unless the acquisition completed successfully.
struct QueuedAcquire<'a> {
  limiter: &'a WeightedLimiter,
  waiter_id: u64,
  weight: u64,
  settled: bool,
}

impl Drop for QueuedAcquire<'_> {
  fn drop(&mut self) {
    if !self.settled {
      self.limiter.abandon(self.waiter_id, self.weight);
    }
  }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}
