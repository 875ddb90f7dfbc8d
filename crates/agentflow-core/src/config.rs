//! Engine tuning knobs.

/// Configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of step jobs executed concurrently.
    pub worker_concurrency: usize,
    /// Page size when a listing does not ask for one.
    pub default_page_limit: usize,
    /// Upper bound on the requested page size.
    pub max_page_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            default_page_limit: 20,
            max_page_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Resolve a requested page size against the defaults and bounds.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_limit)
            .clamp(1, self.max_page_limit.max(1))
    }
}
