use std::time::Duration;

/// Timing and capacity knobs for the probe engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before the scheduler runs its first iteration.
    pub warmup: Duration,
    /// How often a new probe is issued.
    pub probe_interval: Duration,
    /// How long a channel stays temporarily excluded.
    pub exclusion_duration: Duration,
    /// How often lapsed temporary exclusions are removed.
    pub cleanup_interval: Duration,
    /// How often in-flight probes are checked.
    pub poll_interval: Duration,
    /// In-flight probes older than this are force-classified. `None` keeps
    /// them pending forever.
    pub pending_timeout: Option<Duration>,
    /// Upper bound on concurrently running dispatches.
    pub max_inflight_dispatches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(30),
            probe_interval: Duration::from_secs(3600),
            exclusion_duration: Duration::from_secs(1800),
            cleanup_interval: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            pending_timeout: Some(Duration::from_secs(24 * 3600)),
            max_inflight_dispatches: 4,
        }
    }
}
