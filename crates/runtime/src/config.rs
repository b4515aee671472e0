//! Pipeline configuration structures and loaders.
use std::env;
use std::time::Duration;

use crate::api::{PipelineError, Result};

/// Bounded retry applied to every collaborator call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Deadline for a single call.
    pub call_timeout: Duration,
    /// Linear backoff base: attempt `n` sleeps `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_millis(5_000),
            backoff: Duration::from_millis(50),
        }
    }
}

/// Configuration consumed by one pipeline invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub stream_id: String,
    /// Records requested per page.
    pub page_limit: usize,
    /// Page fetches allowed per shard before giving up on new data.
    pub page_fetch_budget: u32,
    /// Wall-clock budget; no new shard is started once it is spent.
    pub invocation_budget: Duration,
    pub retry: RetryPolicy,
    /// Capacity given to a stat seen for the first time.
    pub default_max_sample_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_id: "player-stats".to_string(),
            page_limit: 100,
            page_fetch_budget: 10,
            invocation_budget: Duration::from_millis(240_000),
            retry: RetryPolicy::default(),
            default_max_sample_size: 200,
        }
    }
}

impl PipelineConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            ..Self::default()
        }
    }

    /// Load a `.env` file if present, then read the process environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `LEADERBOARD_STREAM_ID` - Change stream to consume (default: player-stats)
    /// - `LEADERBOARD_PAGE_LIMIT` - Records per page (default: 100)
    /// - `LEADERBOARD_PAGE_FETCH_BUDGET` - Page fetches per shard (default: 10)
    /// - `LEADERBOARD_INVOCATION_BUDGET_MS` - Invocation deadline (default: 240000)
    /// - `LEADERBOARD_RETRY_ATTEMPTS` - Attempts per storage call (default: 3)
    /// - `LEADERBOARD_CALL_TIMEOUT_MS` - Timeout per storage call (default: 5000)
    /// - `LEADERBOARD_RETRY_BACKOFF_MS` - Linear backoff base (default: 50)
    /// - `LEADERBOARD_DEFAULT_SAMPLE_SIZE` - Capacity for new stats (default: 200)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(stream_id) = env::var("LEADERBOARD_STREAM_ID")
            && !stream_id.is_empty()
        {
            config.stream_id = stream_id;
        }
        if let Some(limit) = read_env::<usize>("LEADERBOARD_PAGE_LIMIT") {
            config.page_limit = limit.max(1);
        }
        if let Some(budget) = read_env::<u32>("LEADERBOARD_PAGE_FETCH_BUDGET") {
            config.page_fetch_budget = budget.max(1);
        }
        if let Some(ms) = read_env::<u64>("LEADERBOARD_INVOCATION_BUDGET_MS") {
            config.invocation_budget = Duration::from_millis(ms);
        }
        if let Some(attempts) = read_env::<u32>("LEADERBOARD_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = read_env::<u64>("LEADERBOARD_CALL_TIMEOUT_MS") {
            config.retry.call_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = read_env::<u64>("LEADERBOARD_RETRY_BACKOFF_MS") {
            config.retry.backoff = Duration::from_millis(ms);
        }
        if let Some(size) = read_env::<u64>("LEADERBOARD_DEFAULT_SAMPLE_SIZE") {
            config.default_max_sample_size = size;
        }

        config
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn with_page_fetch_budget(mut self, budget: u32) -> Self {
        self.page_fetch_budget = budget;
        self
    }

    pub fn with_invocation_budget(mut self, budget: Duration) -> Self {
        self.invocation_budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_max_sample_size(mut self, size: u64) -> Self {
        self.default_max_sample_size = size;
        self
    }

    /// Reject values that would make an invocation spin or never read.
    pub fn validate(&self) -> Result<()> {
        if self.stream_id.is_empty() {
            return Err(PipelineError::InvalidConfig("stream_id is empty".into()));
        }
        if self.page_limit == 0 {
            return Err(PipelineError::InvalidConfig("page_limit must be positive".into()));
        }
        if self.page_fetch_budget == 0 {
            return Err(PipelineError::InvalidConfig(
                "page_fetch_budget must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "retry.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}
