//! Configuration types.

use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Fixed delay between consecutive sends within one blast.
    pub blast_pacing: Duration,
    /// Grace delay applied when a schedule is already past due.
    pub past_due_grace: Duration,
    /// Maximum number of blasts dispatched concurrently.
    pub max_concurrent_blasts: usize,
    /// Interval between template status sync sweeps.
    pub template_sync_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            blast_pacing: Duration::from_millis(200),
            past_due_grace: Duration::from_secs(1),
            max_concurrent_blasts: 4,
            template_sync_interval: Duration::from_secs(30 * 60), // 30 minutes
        }
    }
}
