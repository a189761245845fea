//! Domain model module declarations.

pub mod process;
pub mod profiler;
pub mod report;
pub mod session;
