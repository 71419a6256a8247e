use std::env;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOW_MINUTES: u32 = 270;
pub const DEFAULT_FULL_MINUTES: u32 = 900;
pub const DEFAULT_FIXTURE_HORIZON: usize = 5;
/// Points deducted per transfer beyond the free allowance.
pub const DEFAULT_HIT_COST: f64 = 4.0;
pub const DEFAULT_MAX_SEARCH_NODES: usize = 250_000;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_PRECISION_K: usize = 10;
pub const DEFAULT_CALIBRATION_BINS: usize = 10;
pub const DEFAULT_BACKTEST_MAX_TRANSFERS: usize = 2;
pub const DEFAULT_SCORE_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

static ENV_CONFIG: OnceCell<EngineConfig> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub low_minutes: u32,
    pub full_minutes: u32,
    pub fixture_horizon: usize,
    pub hit_cost: f64,
    pub max_search_nodes: usize,
    pub search_timeout_ms: u64,
    pub precision_k: usize,
    pub calibration_bins: usize,
    pub backtest_max_transfers: usize,
    pub workers: usize,
    pub score_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_minutes: DEFAULT_LOW_MINUTES,
            full_minutes: DEFAULT_FULL_MINUTES,
            fixture_horizon: DEFAULT_FIXTURE_HORIZON,
            hit_cost: DEFAULT_HIT_COST,
            max_search_nodes: DEFAULT_MAX_SEARCH_NODES,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
            precision_k: DEFAULT_PRECISION_K,
            calibration_bins: DEFAULT_CALIBRATION_BINS,
            backtest_max_transfers: DEFAULT_BACKTEST_MAX_TRANSFERS,
            workers: default_workers(),
            score_cache_ttl_secs: DEFAULT_SCORE_CACHE_TTL_SECS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let full_minutes = env_parse::<u32>("FPL_FULL_MINUTES")
            .unwrap_or(d.full_minutes)
            .clamp(90, 3420);
        Self {
            low_minutes: env_parse::<u32>("FPL_LOW_MINUTES")
                .unwrap_or(d.low_minutes)
                .min(full_minutes),
            full_minutes,
            fixture_horizon: env_parse::<usize>("FPL_FIXTURE_HORIZON")
                .unwrap_or(d.fixture_horizon)
                .clamp(1, 10),
            hit_cost: env_parse::<f64>("FPL_HIT_COST")
                .filter(|v| v.is_finite())
                .unwrap_or(d.hit_cost)
                .clamp(0.0, 20.0),
            max_search_nodes: env_parse::<usize>("FPL_MAX_SEARCH_NODES")
                .unwrap_or(d.max_search_nodes)
                .max(1),
            search_timeout_ms: env_parse::<u64>("FPL_SEARCH_TIMEOUT_MS")
                .unwrap_or(d.search_timeout_ms)
                .clamp(10, 600_000),
            precision_k: env_parse::<usize>("FPL_PRECISION_K")
                .unwrap_or(d.precision_k)
                .clamp(1, 100),
            calibration_bins: env_parse::<usize>("FPL_CALIBRATION_BINS")
                .unwrap_or(d.calibration_bins)
                .clamp(2, 50),
            backtest_max_transfers: env_parse::<usize>("FPL_BACKTEST_MAX_TRANSFERS")
                .unwrap_or(d.backtest_max_transfers)
                .clamp(0, 15),
            workers: env_parse::<usize>("FPL_WORKERS")
                .unwrap_or(d.workers)
                .clamp(1, 64),
            score_cache_ttl_secs: env_parse::<u64>("FPL_SCORE_CACHE_TTL_SECS")
                .unwrap_or(d.score_cache_ttl_secs)
                .max(1),
        }
    }

    /// Read once per process; the result never changes afterwards.
    pub fn from_env_cached() -> &'static EngineConfig {
        ENV_CONFIG.get_or_init(Self::from_env)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn score_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.score_cache_ttl_secs)
    }
}

/// Run `action` inside a rayon pool of `threads` workers, or inline if the pool can't be built.
pub fn with_worker_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 64)
}
