use bounded_workgroup::{GroupConfig, GroupMode, WorkGroup};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Batches of differing size share one budget of "rows in flight".
#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Weighted Batches Example (Budget: 10 rows) ---");

  let config = GroupConfig::default().with_name("row_budget").with_limit(10);
  let group = WorkGroup::<String>::from_config(config, GroupMode::Independent);
  let never = CancellationToken::new();

  for (batch, rows) in [4u64, 6, 3, 7, 10, 2].into_iter().enumerate() {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let permit = match group.acquire_permit_with_deadline(rows, &never, deadline).await {
      Ok(permit) => permit,
      Err(e) => {
        warn!("Batch {} of {} rows skipped: {}", batch, rows, e);
        continue;
      }
    };
    info!("Batch {} reserved {} rows ({} left in budget)", batch, rows, group.available());
    group.go(async move {
      tokio::time::sleep(Duration::from_millis(100 * permit.weight())).await;
      info!("Batch {} done, returning {} rows", batch, permit.weight());
      Ok(())
    });
  }

  if group.try_acquire(11) {
    warn!("An 11-row batch should never fit a 10-row budget");
  } else {
    info!("An 11-row batch is rejected without waiting.");
  }

  group.wait().await.expect("No batch should fail");
  info!("--- Weighted Batches Example End ---");
}
