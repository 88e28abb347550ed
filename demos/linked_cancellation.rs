use bounded_workgroup::WorkGroup;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Linked Cancellation Example ---");

  let shutdown = CancellationToken::new();
  let group = WorkGroup::<String>::with_cancellation(&shutdown, 2);

  for i in 0..6 {
    let permit = match group.acquire_permit(1).await {
      Ok(permit) => permit,
      Err(e) => {
        info!("Not starting task {}: {}", i, e);
        break;
      }
    };
    let token = group.cancellation_token();
    group.go(async move {
      let _permit = permit;
      if i == 2 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        return Err(format!("task {} hit a bad record", i));
      }
      // Work in slices so the group's cancellation is noticed promptly.
      for _ in 0..10 {
        if token.is_cancelled() {
          info!("Task {} observed cancellation and stopped early.", i);
          return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
      }
      info!("Task {} finished all its work.", i);
      Ok(())
    });
  }

  match group.wait().await {
    Ok(()) => info!("Group finished without failure."),
    Err(e) => info!("Group stopped on first failure: {}", e),
  }
  info!("Parent token still live: {}", !shutdown.is_cancelled());
  info!("--- Linked Cancellation Example End ---");
}
