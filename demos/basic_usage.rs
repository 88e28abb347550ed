use bounded_workgroup::WorkGroup;
use std::time::Duration;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<(), String> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  info!("Task {} finished successfully after {}ms", id, delay_ms);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let group = WorkGroup::<String>::new(2);

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 500 + (i as u64 % 3 * 250);
    group.acquire(1).await.expect("Independent group is never cancelled");
    let g = group.clone();
    group.go(async move {
      let outcome = my_task_fn(i, sleep_duration).await;
      g.release(1);
      outcome
    });
  }

  info!("All tasks submitted ({} still pending). Waiting for the group.", group.pending());
  match group.wait().await {
    Ok(()) => info!("All tasks completed successfully."),
    Err(e) => info!("A task failed: {}", e),
  }
  info!("--- Basic Usage Example End ---");
}
