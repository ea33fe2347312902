use coherence::{CacheConfig, Timing};

/// Everything needed to build a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub cores: usize,
    pub cache: CacheConfig,
    /// Bytes of backing memory
    pub memory_size: u64,
    pub timing: Timing,
    /// Check single-writer/multi-reader across every bank after each cycle
    pub verify_invariants: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            cores: 2,
            cache: CacheConfig::default(),
            memory_size: 64 * 1024,
            timing: Timing::default(),
            verify_invariants: true,
        }
    }
}
