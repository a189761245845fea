//! Host side of a native .NET profiling agent.
//!
//! Stages version-unique copies of the agent library, asks running runtimes
//! to attach it over their diagnostics channel, and tracks the sessions the
//! agent writes back.

pub mod attach;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod models;
pub mod native;
pub mod selftest;
pub mod session;
pub mod staging;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
