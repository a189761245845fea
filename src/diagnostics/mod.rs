//! Client side of the runtime diagnostics IPC channel.
//!
//! This is the attach primitive: the running runtime, not this process, maps
//! the agent library once it accepts an `AttachProfiler` request.

pub mod client;
pub mod codec;
pub mod endpoint;

pub use client::{map_attach_hresult, DiagnosticsClient, RuntimeProcessInfo};
