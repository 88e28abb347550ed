use bounded_workgroup::WorkGroup;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let group = WorkGroup::<String>::new(1);

  let permit = group.acquire_permit(1).await.expect("Failed to acquire capacity");
  group.go(async move {
    let _permit = permit;
    info!("Panicking Task: Starting...");
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Panicking Task: About to panic!");
    panic!("This task is designed to panic!");
    #[allow(unreachable_code)]
    Ok(())
  });

  // Completion accounting survives the panic, and the capacity comes back with the permit.
  match AssertUnwindSafe(group.wait()).catch_unwind().await {
    Ok(result) => info!("Group completed with UNEXPECTED result: {:?}", result),
    Err(_) => info!("wait() correctly re-raised the task panic."),
  }
  info!("Capacity available again: {}", group.available());
  info!("--- Task Panic Example End ---");
}
