use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

pub(crate) const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub(crate) const DEFAULT_CLIENT_NAME: &str = "coopx";
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub(crate) const DEFAULT_MAX_LOG_ENTRIES: usize = 100;
pub(crate) const DEFAULT_REFRESH_ENDPOINT: &str = "/auth/refresh";

const ENV_BASE_URL: &str = "COOPX_API_BASE_URL";
const ENV_TIMEOUT_MS: &str = "COOPX_TIMEOUT_MS";
const ENV_RETRIES: &str = "COOPX_RETRIES";
const ENV_RETRY_DELAY_MS: &str = "COOPX_RETRY_DELAY_MS";
const ENV_CACHE_TTL_MS: &str = "COOPX_CACHE_TTL_MS";

/// Client-wide settings, loadable from serde sources or the environment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub client_name: String,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub cache_ttl_ms: u64,
    pub enable_deduplication: bool,
    pub enable_logging: bool,
    pub max_log_entries: usize,
    pub refresh_endpoint: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            retries: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            cache_ttl_ms: DEFAULT_CACHE_TTL.as_millis() as u64,
            enable_deduplication: true,
            enable_logging: true,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|value| !value.trim().is_empty()) {
            config.base_url = base_url.trim().to_owned();
        }
        if let Some(timeout_ms) = parse_env(&lookup, ENV_TIMEOUT_MS) {
            config.timeout_ms = timeout_ms;
        }
        if let Some(retries) = parse_env(&lookup, ENV_RETRIES) {
            config.retries = retries;
        }
        if let Some(retry_delay_ms) = parse_env(&lookup, ENV_RETRY_DELAY_MS) {
            config.retry_delay_ms = retry_delay_ms;
        }
        if let Some(cache_ttl_ms) = parse_env(&lookup, ENV_CACHE_TTL_MS) {
            config.cache_ttl_ms = cache_ttl_ms;
        }
        config
    }

    pub(crate) fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_policy: RetryPolicy::standard()
                .max_attempts(self.retries)
                .base_backoff(Duration::from_millis(self.retry_delay_ms)),
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            enable_deduplication: self.enable_deduplication,
            enable_logging: self.enable_logging,
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RequestDefaults {
    pub(crate) timeout: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) cache_ttl: Duration,
    pub(crate) enable_deduplication: bool,
    pub(crate) enable_logging: bool,
}

/// Per-call overrides; `None` falls back to the client defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub retry_delay: Option<Duration>,
    pub enable_cache: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub enable_deduplication: Option<bool>,
    pub enable_logging: Option<bool>,
    pub skip_refresh_token: Option<bool>,
}

impl RequestConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    pub fn with_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = Some(enable_cache);
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = Some(cache_ttl);
        self
    }

    pub fn with_deduplication(mut self, enable_deduplication: bool) -> Self {
        self.enable_deduplication = Some(enable_deduplication);
        self
    }

    pub fn with_logging(mut self, enable_logging: bool) -> Self {
        self.enable_logging = Some(enable_logging);
        self
    }

    pub fn with_skip_refresh_token(mut self, skip_refresh_token: bool) -> Self {
        self.skip_refresh_token = Some(skip_refresh_token);
        self
    }

    pub(crate) fn resolve(&self, defaults: &RequestDefaults, is_get: bool) -> ResolvedConfig {
        let mut retry_policy = defaults.retry_policy.clone();
        if let Some(retries) = self.retries {
            retry_policy = retry_policy.max_attempts(retries);
        }
        if let Some(retry_delay) = self.retry_delay {
            retry_policy = retry_policy.base_backoff(retry_delay);
        }
        ResolvedConfig {
            timeout: self
                .timeout
                .unwrap_or(defaults.timeout)
                .max(Duration::from_millis(1)),
            retry_policy,
            enable_cache: self.enable_cache.unwrap_or(is_get),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            enable_deduplication: self
                .enable_deduplication
                .unwrap_or(defaults.enable_deduplication),
            enable_logging: self.enable_logging.unwrap_or(defaults.enable_logging),
            skip_refresh_token: self.skip_refresh_token.unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) timeout: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) enable_cache: bool,
    pub(crate) cache_ttl: Duration,
    pub(crate) enable_deduplication: bool,
    pub(crate) enable_logging: bool,
    pub(crate) skip_refresh_token: bool,
}
