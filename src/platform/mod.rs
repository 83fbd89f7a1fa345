//! Host-facing plumbing: errors, artifact files, child processes.

pub mod error;
pub mod fsutil;
pub mod process;
