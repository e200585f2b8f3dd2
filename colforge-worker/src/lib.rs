//! Colforge worker
//!
//! Execution side of the colforge job service: persistence, the task
//! queue with its lanes and retry policy, colbuilder config
//! materialization, subprocess execution, the expiry sweep, and the
//! submission gateway callers go through.

pub mod config;
pub mod executor;
pub mod gateway;
pub mod materialize;
pub mod process;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod store;
