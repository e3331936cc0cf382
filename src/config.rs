//! Runtime-configurable switches for the communicator layer.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `STRATUM_`) or by constructing a custom `CommConfig`.

/// Operational switches read once at communicator-build time.
#[derive(Debug, Clone, Default)]
pub struct CommConfig {
    /// Force-disable two-level (intra-node / inter-node) summing even when
    /// the topology split would be worthwhile. Escape hatch for clusters
    /// where the node-local reduction misbehaves.
    pub no_two_level: bool,
}

impl CommConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `STRATUM_NO_NODECOMM` — if set (any value), disables two-level summing.
    pub fn from_env() -> Self {
        Self {
            no_two_level: std::env::var_os("STRATUM_NO_NODECOMM").is_some(),
        }
    }
}
