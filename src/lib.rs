//! Loadflame core library: run a server under a sampling profiler, drive a
//! deterministic request load at it, and fold the trace into a flame graph.

mod config;
mod duration;
mod engine;
mod pipeline;
mod profiler;
mod reporting;
mod shooter;
mod workload;

#[cfg(test)]
mod testutil;

pub mod platform;
pub mod runtime;

pub use config::*;
pub use duration::*;
pub use engine::*;
pub use pipeline::*;
pub use platform::error::*;
pub use profiler::*;
pub use reporting::*;
pub use shooter::*;
pub use workload::*;
