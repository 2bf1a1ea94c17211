use std::time::Duration;

/// Construction-time configuration for a `Program`: gathers everything the
/// engine needs up front rather than scattering flags across call sites.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// When true, a cycle with no selectable event parks waiting for an
    /// external event instead of terminating.
    pub daemon: bool,
    /// Optional wall-clock budget for a single cycle. Exceeding it aborts
    /// the program with `BpError::CycleTimeout`.
    pub cycle_timeout: Option<Duration>,
    /// Seed for the deterministic PRNG exposed to b-thread bodies via
    /// `BpContext::random` and used by `SeededRandomStrategy`. The engine
    /// never falls back to the host platform's default RNG, so a seed is
    /// always required rather than defaulted to "random".
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            daemon: false,
            cycle_timeout: None,
            seed: 0,
        }
    }
}

impl EngineConfig {
    pub fn new(seed: u64) -> Self {
        EngineConfig {
            seed,
            ..Default::default()
        }
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = Some(timeout);
        self
    }
}
