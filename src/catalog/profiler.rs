//! Profiler catalog built from configuration.

use super::ProfilerCatalog;
use crate::config::GlobalConfig;
use crate::models::profiler::ProfilerDescriptor;

/// Fixed list of profilers, typically the `[[profilers]]` config entries.
#[derive(Debug, Clone, Default)]
pub struct StaticProfilerCatalog {
    profilers: Vec<ProfilerDescriptor>,
}

impl StaticProfilerCatalog {
    /// Catalog over `profilers`, in the given order.
    #[must_use]
    pub fn new(profilers: Vec<ProfilerDescriptor>) -> Self {
        Self { profilers }
    }

    /// Catalog over the configured profilers.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.profilers.clone())
    }
}

impl ProfilerCatalog for StaticProfilerCatalog {
    fn profilers(&self, include_unreleased: bool) -> Vec<ProfilerDescriptor> {
        self.profilers
            .iter()
            .filter(|profiler| include_unreleased || profiler.is_released)
            .cloned()
            .collect()
    }
}
