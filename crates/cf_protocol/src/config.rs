//! System configuration, read from the environment at process start.

use std::env;
use std::time::Duration;

/// All tunables shared by the orchestrator, worker, and API processes.
///
/// Each process reads only the fields it needs, but the struct is constructed once
/// from the environment so the effective configuration can be logged in one place
/// at startup.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Base URL of the hub this engine tracks.
    pub hf_endpoint: String,
    /// Token used for authenticated hub requests (gated datasets, private repos).
    pub hf_token: Option<String>,

    /// Cache entries older than this are eligible for the cache-maintenance sweep.
    pub cache_max_days: u32,

    /// Jobs left in STARTED with a stale heartbeat past this age are reclaimed.
    pub queue_ttl: Duration,
    /// Per-namespace cap on concurrently in-flight jobs (fairness).
    pub max_jobs_per_namespace: u32,

    /// Heartbeat emission interval for a worker's in-flight job.
    pub worker_heartbeat_interval: Duration,
    /// A job exceeding this wall-clock duration is failed as `JobRunnerExceededMaximumDurationError`.
    pub worker_max_duration: Duration,
    /// Size cap enforced by the step runtime's size guard; exceeding it yields `TooBigContent`.
    pub worker_content_max_bytes: u64,

    /// `Cache-Control: max-age` applied to successful, stable API responses.
    pub api_max_age_long: Duration,
    /// `Cache-Control: max-age` applied to responses still subject to near-term refresh.
    pub api_max_age_short: Duration,
    /// Upper bound on `length` for any paginated rows/search endpoint.
    pub max_num_rows_per_page: u32,
}

impl SystemConfig {
    /// Build a configuration from environment variables, falling back to the engine's
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            hf_endpoint: env::var("COMMON_HF_ENDPOINT")
                .unwrap_or_else(|_| "https://huggingface.co".to_string()),
            hf_token: env::var("COMMON_HF_TOKEN").ok().filter(|s| !s.is_empty()),

            cache_max_days: env_u32("CACHE_MAX_DAYS", 90),

            queue_ttl: Duration::from_secs(env_u64("QUEUE_TTL_SECONDS", 604_800)),
            max_jobs_per_namespace: env_u32("WORKER_MAX_JOBS_PER_NAMESPACE", 20),

            worker_heartbeat_interval: Duration::from_secs(env_u64("WORKER_HEARTBEAT_INTERVAL", 60)),
            worker_max_duration: Duration::from_secs(env_u64("WORKER_MAX_DURATION", 20 * 60)),
            worker_content_max_bytes: env_u64("WORKER_CONTENT_MAX_BYTES", 10_000_000),

            api_max_age_long: Duration::from_secs(env_u64("API_MAX_AGE_LONG", 120)),
            api_max_age_short: Duration::from_secs(env_u64("API_MAX_AGE_SHORT", 10)),
            max_num_rows_per_page: env_u32("MAX_NUM_ROWS_PER_PAGE", 100),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values_when_unset() {
        env::remove_var("CACHE_MAX_DAYS");
        env::remove_var("QUEUE_TTL_SECONDS");
        env::remove_var("MAX_NUM_ROWS_PER_PAGE");
        let cfg = SystemConfig::from_env();
        assert_eq!(cfg.cache_max_days, 90);
        assert_eq!(cfg.queue_ttl, Duration::from_secs(604_800));
        assert_eq!(cfg.max_num_rows_per_page, 100);
    }

    #[test]
    fn malformed_env_value_falls_back_to_default() {
        env::set_var("CACHE_MAX_DAYS", "not-a-number");
        let cfg = SystemConfig::from_env();
        assert_eq!(cfg.cache_max_days, 90);
        env::remove_var("CACHE_MAX_DAYS");
    }
}
