//! Timeouts, bounded retries and connection reuse for every outbound call.
//!
//! A single [`ResilientClient`] is constructed at startup and handed to the
//! backends and tools that need the network. Nothing in here mutates
//! process-wide state.

mod pool;
mod retry;

pub use pool::{HostLimiter, HostPermit, PoolConfig, ResilientClient};
pub use retry::{retry_before_output, Deadline, RetryPolicy};
