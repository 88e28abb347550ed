use bounded_workgroup::WorkGroup;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let group = WorkGroup::<String>::new(concurrency_limit);
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let num_tasks = 5;
  info!(
    "Submitting {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  for i in 0..num_tasks {
    let permit = group.acquire_permit(1).await.expect("Failed to acquire capacity");
    let running = running.clone();
    let peak = peak.clone();
    group.go(async move {
      let _permit = permit;
      let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now_running, Ordering::SeqCst);
      info!("Task {} starting ({} running)", i, now_running);
      tokio::time::sleep(Duration::from_secs(1)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      info!("Task {} finished", i);
      Ok(())
    });
  }

  group.wait().await.expect("No task should fail");
  info!(
    "All tasks processed in {:?}. Peak concurrency: {}",
    started.elapsed(),
    peak.load(Ordering::SeqCst)
  );
  info!("--- Concurrency Limit Example End ---");
}
