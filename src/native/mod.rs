//! Native agent loading and manual object activation.
//!
//! Used by the self-test harness only; the production attach path hands
//! the staged path to the target runtime and never maps the library itself.

pub mod com;
pub mod loader;

pub use loader::{ActivatedObject, NativeLibrary};
