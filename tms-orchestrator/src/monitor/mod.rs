//! Background tasks
//!
//! Three cooperative loops run beside the HTTP server, each with a
//! watch-channel shutdown:
//!
//! - the health monitor probes runner health endpoints and demotes
//!   unresponsive runners out of assignment eligibility,
//! - the dispatch tick re-offers queued executions and shards to the
//!   assignment engine,
//! - the timeout sweep force-fails running work whose deadline elapsed.

pub mod dispatch;
pub mod health;
pub mod sweep;
