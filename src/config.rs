//! Construction options for a [`WorkGroup`](crate::WorkGroup).
//!
//! ```
//! use bounded_workgroup::{GroupConfig, GroupMode, WorkGroup};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let shutdown = CancellationToken::new();
//! let config = GroupConfig::default().with_name("uploads").with_limit(8);
//! let group = WorkGroup::<std::io::Error>::from_config(config, GroupMode::Linked(shutdown));
//!
//! assert_eq!(group.name(), "uploads");
//! assert_eq!(group.capacity(), 8);
//! assert!(group.is_linked());
//! # }
//! ```

use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;

/// Naming, sizing and runtime placement of a group.
#[derive(Clone, Debug)]
pub struct GroupConfig {
  /// Name attached to every log line and task span of the group.
  pub name: String,
  /// Total weight of the capacity pool. A limit of `0` is raised to `1`.
  pub limit: u64,
  /// Runtime that submitted tasks are spawned on (`None` = the caller's current runtime).
  pub runtime: Option<TokioHandle>,
}

impl Default for GroupConfig {
  /// Provides a default configuration:
  /// - `name = "work_group"`
  /// - `limit` = available parallelism of the machine (1 if unknown)
  /// - `runtime = None`
  fn default() -> Self {
    Self {
      name: "work_group".to_string(),
      limit: std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1),
      runtime: None,
    }
  }
}

impl GroupConfig {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_limit(mut self, limit: u64) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_runtime(mut self, runtime: TokioHandle) -> Self {
    self.runtime = Some(runtime);
    self
  }
}

/// How task failures affect the rest of the group. Fixed for the group's lifetime.
#[derive(Clone, Debug, Default)]
pub enum GroupMode {
  /// Failures are recorded but siblings keep running.
  #[default]
  Independent,
  /// The group token is a child of this token. It fires on the first task
  /// failure, when the parent is cancelled, or once `wait()` returns.
  Linked(CancellationToken),
}
