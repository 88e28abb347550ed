//! A Tokio-based bounded task group: weighted admission control fused with
//! first-error aggregation and optional cooperative cancellation.

mod config;
mod error;
mod group;
mod limiter;
mod outcome;
mod permit;
mod task;

pub use config::{GroupConfig, GroupMode};
pub use error::AcquireError;
pub use group::WorkGroup;
pub use permit::Permit;
pub use task::{BoxedTask, GroupPhase};
