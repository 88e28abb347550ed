use crate::task::{next_task_id, GroupPhase};

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn, Instrument};

/// How a task failed.
pub(crate) enum Failure<E> {
  Error(E),
  Panic(Box<dyn Any + Send + 'static>),
}

/// Runs submitted tasks and keeps the first failure among them.
///
/// `pending` counts submitted tasks that have not completed yet. It is
/// incremented before a task is spawned and decremented by a drop guard, so a
/// task that panics or is dropped by a shutting-down runtime still counts as done.
pub(crate) struct OutcomeAggregator<E> {
  name: Arc<String>,
  pending: AtomicUsize,
  phase: AtomicU8,
  first_failure: Mutex<Option<Failure<E>>>,
  all_done: Notify,
  cancel_on_failure: Option<CancellationToken>,
}

impl<E: Send + 'static> OutcomeAggregator<E> {
  pub(crate) fn new(name: Arc<String>, cancel_on_failure: Option<CancellationToken>) -> Self {
    Self {
      name,
      pending: AtomicUsize::new(0),
      phase: AtomicU8::new(GroupPhase::Open as u8),
      first_failure: Mutex::new(None),
      all_done: Notify::new(),
      cancel_on_failure,
    }
  }

  pub(crate) fn pending(&self) -> usize {
    self.pending.load(Ordering::SeqCst)
  }

  pub(crate) fn phase(&self) -> GroupPhase {
    GroupPhase::from_u8(self.phase.load(Ordering::SeqCst))
  }

  pub(crate) fn spawn<F>(self: &Arc<Self>, runtime: Option<&TokioHandle>, task: F)
  where
    F: Future<Output = Result<(), E>> + Send + 'static,
  {
    let task_id = next_task_id();
    let phase = self.phase();
    if phase != GroupPhase::Open {
      warn!(
        group = %*self.name,
        %task_id,
        ?phase,
        "Task submitted after wait() was called. It will run, but that wait() may not observe it."
      );
    }

    self.pending.fetch_add(1, Ordering::SeqCst);
    let completion = CompletionGuard {
      aggregator: self.clone(),
      task_id,
    };

    let execution = async move {
      let completion = completion;
      match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(())) => trace!("Task completed successfully."),
        Ok(Err(err)) => {
          trace!("Task returned an error.");
          completion.aggregator.record(task_id, Failure::Error(err));
        }
        Err(payload) => {
          error!("Task panicked during execution.");
          completion.aggregator.record(task_id, Failure::Panic(payload));
        }
      }
    }
    .instrument(info_span!("work_group_task", group = %*self.name, %task_id));

    match runtime {
      Some(handle) => {
        handle.spawn(execution);
      }
      None => {
        tokio::spawn(execution);
      }
    }
  }

  /// Keeps `failure` if it is the first one, and cancels the group in linked mode.
  fn record(&self, task_id: u64, failure: Failure<E>) {
    let is_first = {
      let mut slot = self.first_failure.lock();
      if slot.is_none() {
        *slot = Some(failure);
        true
      } else {
        false
      }
    };

    if !is_first {
      trace!(group = %*self.name, %task_id, "Discarding failure; an earlier one is already recorded.");
      return;
    }
    debug!(group = %*self.name, %task_id, "Recorded first task failure.");

    if let Some(token) = &self.cancel_on_failure {
      if !token.is_cancelled() {
        debug!(group = %*self.name, %task_id, "Cancelling group after first failure.");
      }
      token.cancel();
    }
  }

  /// Blocks until no task is pending, then hands back the first failure.
  ///
  /// A first failure that was a panic is resumed on the caller.
  pub(crate) async fn wait(&self) -> Result<(), E> {
    let previous = self.phase.compare_exchange(
      GroupPhase::Open as u8,
      GroupPhase::Draining as u8,
      Ordering::SeqCst,
      Ordering::SeqCst,
    );
    if previous == Err(GroupPhase::Draining as u8) {
      warn!(group = %*self.name, "wait() called while another wait() is still draining the group.");
    }

    loop {
      let all_done = self.all_done.notified();
      tokio::pin!(all_done);
      all_done.as_mut().enable();
      if self.pending.load(Ordering::SeqCst) == 0 {
        break;
      }
      all_done.await;
    }

    self.phase.store(GroupPhase::Done as u8, Ordering::SeqCst);
    if let Some(token) = &self.cancel_on_failure {
      token.cancel();
    }

    let failure = self.first_failure.lock().take();
    match failure {
      None => {
        debug!(group = %*self.name, "All tasks completed without failure.");
        Ok(())
      }
      Some(Failure::Error(err)) => Err(err),
      Some(Failure::Panic(payload)) => panic::resume_unwind(payload),
    }
  }
}

struct CompletionGuard<E> {
  aggregator: Arc<OutcomeAggregator<E>>,
  task_id: u64,
}

impl<E> Drop for CompletionGuard<E> {
  fn drop(&mut self) {
    let remaining = self.aggregator.pending.fetch_sub(1, Ordering::SeqCst) - 1;
    trace!(group = %*self.aggregator.name, task_id = %self.task_id, remaining, "Task finished.");
    if remaining == 0 {
      self.aggregator.all_done.notify_waiters();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::time::Duration;
  use tokio::time::{sleep, timeout};

  fn aggregator(cancel_on_failure: Option<CancellationToken>) -> Arc<OutcomeAggregator<String>> {
    Arc::new(OutcomeAggregator::new(
      Arc::new("test_aggregator".to_string()),
      cancel_on_failure,
    ))
  }

  async fn wait_until_idle(aggregator: &OutcomeAggregator<String>) {
    timeout(Duration::from_secs(1), async {
      while aggregator.pending() != 0 {
        tokio::task::yield_now().await;
      }
    })
    .await
    .expect("tasks never finished");
  }

  #[tokio::test]
  async fn test_wait_without_tasks_returns_immediately() {
    let aggregator = aggregator(None);
    assert_eq!(aggregator.phase(), GroupPhase::Open);

    let result = timeout(Duration::from_millis(50), aggregator.wait())
      .await
      .expect("wait() with nothing pending must not block");
    assert_eq!(result, Ok(()));
    assert_eq!(aggregator.phase(), GroupPhase::Done);
  }

  #[tokio::test]
  async fn test_wait_blocks_until_every_task_finishes() {
    let aggregator = aggregator(None);
    let finished = Arc::new(AtomicUsize::new(0));

    for delay in [30u64, 10, 20] {
      let finished = finished.clone();
      aggregator.spawn(None, async move {
        sleep(Duration::from_millis(delay)).await;
        finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }
    assert_eq!(aggregator.pending(), 3);

    assert_eq!(aggregator.wait().await, Ok(()));
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    assert_eq!(aggregator.pending(), 0);
  }

  #[tokio::test]
  async fn test_first_failure_wins_by_completion_order() {
    let aggregator = aggregator(None);

    aggregator.spawn(None, async { Err("first".to_string()) });
    wait_until_idle(&aggregator).await;
    aggregator.spawn(None, async { Err("second".to_string()) });

    assert_eq!(aggregator.wait().await, Err("first".to_string()));
  }

  #[tokio::test]
  async fn test_failure_is_taken_by_the_first_wait() {
    let aggregator = aggregator(None);
    aggregator.spawn(None, async { Err("boom".to_string()) });

    assert_eq!(aggregator.wait().await, Err("boom".to_string()));
    assert_eq!(aggregator.wait().await, Ok(()));
  }

  #[tokio::test]
  async fn test_panicking_task_still_completes_and_resumes_on_wait() {
    let aggregator = aggregator(None);
    let sibling_ran = Arc::new(AtomicBool::new(false));

    let explode = true;
    aggregator.spawn(None, async move {
      if explode {
        panic!("task blew up");
      }
      Ok(())
    });
    {
      let sibling_ran = sibling_ran.clone();
      aggregator.spawn(None, async move {
        sleep(Duration::from_millis(10)).await;
        sibling_ran.store(true, Ordering::SeqCst);
        Ok(())
      });
    }

    let outcome = AssertUnwindSafe(aggregator.wait()).catch_unwind().await;
    let payload = outcome.expect_err("wait() should resume the task panic");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"task blew up"));
    assert!(sibling_ran.load(Ordering::SeqCst));
    assert_eq!(aggregator.pending(), 0);
  }

  #[tokio::test]
  async fn test_failure_cancels_token_when_linked() {
    let token = CancellationToken::new();
    let aggregator = aggregator(Some(token.clone()));

    aggregator.spawn(None, async { Err("fail".to_string()) });
    wait_until_idle(&aggregator).await;
    assert!(token.is_cancelled());

    assert_eq!(aggregator.wait().await, Err("fail".to_string()));
  }

  #[tokio::test]
  async fn test_wait_cancels_linked_token_even_without_failure() {
    let token = CancellationToken::new();
    let aggregator = aggregator(Some(token.clone()));

    aggregator.spawn(None, async { Ok(()) });
    wait_until_idle(&aggregator).await;
    assert!(!token.is_cancelled());

    assert_eq!(aggregator.wait().await, Ok(()));
    assert!(token.is_cancelled());
  }

  #[tokio::test]
  async fn test_phase_moves_through_draining() {
    let aggregator = aggregator(None);
    let release = CancellationToken::new();
    {
      let release = release.clone();
      aggregator.spawn(None, async move {
        release.cancelled().await;
        Ok(())
      });
    }

    let waiter = {
      let aggregator = aggregator.clone();
      tokio::spawn(async move { aggregator.wait().await })
    };
    timeout(Duration::from_secs(1), async {
      while aggregator.phase() != GroupPhase::Draining {
        tokio::task::yield_now().await;
      }
    })
    .await
    .expect("wait() never started draining");

    release.cancel();
    assert_eq!(waiter.await.unwrap(), Ok(()));
    assert_eq!(aggregator.phase(), GroupPhase::Done);
  }

  #[tokio::test]
  async fn test_overlapping_waits_both_return_and_one_takes_the_failure() {
    let aggregator = aggregator(None);
    let release = CancellationToken::new();
    {
      let release = release.clone();
      aggregator.spawn(None, async move {
        release.cancelled().await;
        Err("boom".to_string())
      });
    }

    let waiters: Vec<_> = (0..2)
      .map(|_| {
        let aggregator = aggregator.clone();
        tokio::spawn(async move { aggregator.wait().await })
      })
      .collect();
    timeout(Duration::from_secs(1), async {
      while aggregator.phase() != GroupPhase::Draining {
        tokio::task::yield_now().await;
      }
    })
    .await
    .expect("wait() never started draining");
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }

    release.cancel();
    let mut results = Vec::new();
    for waiter in waiters {
      let result = timeout(Duration::from_secs(1), waiter)
        .await
        .expect("every overlapping wait() must return")
        .unwrap();
      results.push(result);
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err("boom".to_string())));
    assert_eq!(aggregator.phase(), GroupPhase::Done);
  }

  #[tokio::test]
  async fn test_task_submitted_after_wait_still_runs_and_is_reported() {
    let aggregator = aggregator(None);
    assert_eq!(aggregator.wait().await, Ok(()));
    assert_eq!(aggregator.phase(), GroupPhase::Done);

    let ran = Arc::new(AtomicBool::new(false));
    {
      let ran = ran.clone();
      aggregator.spawn(None, async move {
        ran.store(true, Ordering::SeqCst);
        Err("late".to_string())
      });
    }

    assert_eq!(aggregator.wait().await, Err("late".to_string()));
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(aggregator.phase(), GroupPhase::Done);
  }
}
