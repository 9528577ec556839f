//! Configuration for the client.

use gqlsync_cache::CacheKeyResolver;
use rand::Rng;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where the cache keeps its authoritative records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreConfig {
    /// Ephemeral in-memory records.
    #[default]
    InMemory,
    /// Records persisted to an append-only log file.
    File {
        /// Log file path. Parent directories are created on open.
        path: PathBuf,
    },
}

/// Configuration for a [`crate::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Cache store backend.
    pub store: StoreConfig,
    /// Retry configuration for mutations and network fetches.
    pub retry: RetryConfig,
    /// How long an operation may wait for the network before it fails.
    ///
    /// `None` waits indefinitely.
    pub offline_timeout: Option<Duration>,
    /// Timeout for one transport request.
    pub request_timeout: Duration,
    /// Identity resolver for normalizing results. Defaults to `__typename:id`.
    pub key_resolver: Option<Arc<dyn CacheKeyResolver>>,
}

impl ClientConfig {
    /// Creates a configuration with defaults: in-memory store, 3 attempts,
    /// no offline timeout, 30 second requests.
    pub fn new() -> Self {
        Self {
            store: StoreConfig::InMemory,
            retry: RetryConfig::default(),
            offline_timeout: None,
            request_timeout: Duration::from_secs(30),
            key_resolver: None,
        }
    }

    /// Sets the store backend.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Persists the cache to `path`.
    pub fn with_file_store(self, path: impl Into<PathBuf>) -> Self {
        self.with_store(StoreConfig::File { path: path.into() })
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the offline timeout.
    pub fn with_offline_timeout(mut self, timeout: Duration) -> Self {
        self.offline_timeout = Some(timeout);
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the cache key resolver.
    pub fn with_cache_key_resolver(mut self, resolver: impl CacheKeyResolver + 'static) -> Self {
        self.key_resolver = Some(Arc::new(resolver));
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("offline_timeout", &self.offline_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("custom_key_resolver", &self.key_resolver.is_some())
            .finish()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of send attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` failures.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Calculates the delay for a given attempt (0-indexed).
    ///
    /// Never exceeds `max_delay` plus jitter. A negative backoff yields no
    /// delay; a non-finite one yields `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_secs = self.max_delay.as_secs_f64();
        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = if base_delay.is_finite() {
            base_delay.clamp(0.0, max_secs)
        } else {
            max_secs
        };

        let delay_secs = if self.add_jitter {
            // Up to 25% on top of the base delay.
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen::<f64>()
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlsync_cache::CacheKey;
    use serde_json::{Map, Value};

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new()
            .with_file_store("/tmp/gqlsync/cache.log")
            .with_offline_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(60))
            .with_retry(RetryConfig::no_retry());

        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("/tmp/gqlsync/cache.log")
            }
        );
        assert_eq!(config.offline_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.key_resolver.is_none());
    }

    #[test]
    fn custom_resolver_is_kept() {
        let config = ClientConfig::default().with_cache_key_resolver(|object: &Map<String, Value>| {
            object.get("uuid")?.as_str().map(CacheKey::new)
        });
        assert!(config.key_resolver.is_some());
        assert!(format!("{config:?}").contains("custom_key_resolver: true"));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert!(config.allows_retry(0));
        assert!(!config.allows_retry(1));
    }

    #[test]
    fn zero_attempts_still_sends_once() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
        assert!(delay2 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(4)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn retry_delay_survives_bad_multipliers() {
        let negative = RetryConfig::new(3).with_backoff_multiplier(-2.0);
        assert_eq!(negative.delay_for_attempt(2), Duration::ZERO);

        let nan = RetryConfig::new(3)
            .with_backoff_multiplier(f64::NAN)
            .with_max_delay(Duration::from_secs(2))
            .with_jitter(false);
        assert_eq!(nan.delay_for_attempt(2), Duration::from_secs(2));

        let unbounded = RetryConfig::new(3)
            .with_backoff_multiplier(f64::MAX)
            .with_max_delay(Duration::MAX);
        assert!(unbounded.delay_for_attempt(3) <= Duration::MAX);
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
