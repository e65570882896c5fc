use serde::{Deserialize, Serialize};

/// Layered config for the pipeline: built-in defaults overridden by
/// environment variables. Simplified from `tandem-core::config::ConfigStore`'s
/// global/project/managed/env/runtime/cli layering — this headless core
/// has no on-disk project or managed config to layer, only defaults and
/// environment (spec §9.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Resident history size per itinerary (spec §3 HistoryTail, K >= 10).
    pub history_tail_size: usize,
    /// Per-subscriber bounded channel capacity (spec §5, size >= 16).
    pub subscriber_buffer_size: usize,
    /// Bound on concurrent day/node workers within one phase.
    pub phase_pool_size: usize,
    /// Bound on concurrently active generations (spec §5 pipeline pool).
    pub max_concurrent_generations: usize,
    pub default_max_attempts: u32,
    pub default_base_backoff_ms: u64,
    pub default_backoff_cap_ms: u64,
    pub default_per_attempt_timeout_ms: u64,
    /// Overall generation deadline before PO triggers cancellation.
    pub generation_deadline_ms: u64,
    /// Enrichment batch boundary: whichever threshold is hit first
    /// closes the batch (spec Open Questions, resolved in DESIGN.md).
    pub enrichment_batch_size: usize,
    pub enrichment_batch_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_tail_size: 10,
            subscriber_buffer_size: 64,
            phase_pool_size: 8,
            max_concurrent_generations: 16,
            default_max_attempts: 3,
            default_base_backoff_ms: 250,
            default_backoff_cap_ms: 4_000,
            default_per_attempt_timeout_ms: 20_000,
            generation_deadline_ms: 10 * 60 * 1000,
            enrichment_batch_size: 5,
            enrichment_batch_interval_ms: 2_000,
        }
    }
}

impl PipelineConfig {
    /// Applies environment overrides on top of the defaults. Unset or
    /// unparseable variables are ignored, leaving the default in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_usize("ITIN_HISTORY_TAIL_SIZE") {
            config.history_tail_size = v;
        }
        if let Some(v) = env_usize("ITIN_SUBSCRIBER_BUFFER_SIZE") {
            config.subscriber_buffer_size = v;
        }
        if let Some(v) = env_usize("ITIN_PHASE_POOL_SIZE") {
            config.phase_pool_size = v;
        }
        if let Some(v) = env_usize("ITIN_MAX_CONCURRENT_GENERATIONS") {
            config.max_concurrent_generations = v;
        }
        if let Some(v) = env_u32("ITIN_DEFAULT_MAX_ATTEMPTS") {
            config.default_max_attempts = v;
        }
        if let Some(v) = env_u64("ITIN_DEFAULT_BASE_BACKOFF_MS") {
            config.default_base_backoff_ms = v;
        }
        if let Some(v) = env_u64("ITIN_DEFAULT_BACKOFF_CAP_MS") {
            config.default_backoff_cap_ms = v;
        }
        if let Some(v) = env_u64("ITIN_DEFAULT_PER_ATTEMPT_TIMEOUT_MS") {
            config.default_per_attempt_timeout_ms = v;
        }
        if let Some(v) = env_u64("ITIN_GENERATION_DEADLINE_MS") {
            config.generation_deadline_ms = v;
        }
        if let Some(v) = env_usize("ITIN_ENRICHMENT_BATCH_SIZE") {
            config.enrichment_batch_size = v;
        }
        if let Some(v) = env_u64("ITIN_ENRICHMENT_BATCH_INTERVAL_MS") {
            config.enrichment_batch_interval_ms = v;
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
