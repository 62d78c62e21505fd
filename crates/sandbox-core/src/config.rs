//! Client configuration.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poller::StatusPoller;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "SANDBOX_API_KEY";
/// Environment variable overriding the control-plane endpoint.
pub const ENDPOINT_ENV: &str = "SANDBOX_ENDPOINT";

/// Default control-plane endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://sandbox.api.local";
/// Default per-call chunk size for file transfer (50 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 50 * 1024;

/// How poll loops treat statuses outside the expected set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownStatusPolicy {
    /// Keep waiting; the backend vocabulary may have grown.
    #[default]
    Lenient,
    /// Fail the wait as soon as an unexpected status shows up.
    Strict,
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),
}

/// Client configuration shared by every coordination component.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Opaque API key, carried but never interpreted.
    pub api_key: String,
    /// Control-plane address, read by transport implementations of the
    /// collaborator traits. The coordination core never dials it.
    pub endpoint: String,
    /// Upper bound on a single status call inside a poll loop.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub chunk_size: usize,
    #[serde(with = "duration_ms")]
    pub pause_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub pause_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub sync_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sync_poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub initial_sync_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub initial_sync_poll_interval: Duration,
    pub unknown_status: UnknownStatusPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(60),
            chunk_size: DEFAULT_CHUNK_SIZE,
            pause_timeout: Duration::from_secs(600),
            pause_poll_interval: Duration::from_secs(2),
            sync_timeout: Duration::from_millis(150 * 1500),
            sync_poll_interval: Duration::from_millis(1500),
            initial_sync_timeout: Duration::from_secs(300),
            initial_sync_poll_interval: Duration::from_secs(2),
            unknown_status: UnknownStatusPolicy::Lenient,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("chunk_size", &self.chunk_size)
            .field("pause_timeout", &self.pause_timeout)
            .field("pause_poll_interval", &self.pause_poll_interval)
            .field("sync_timeout", &self.sync_timeout)
            .field("sync_poll_interval", &self.sync_poll_interval)
            .field("initial_sync_timeout", &self.initial_sync_timeout)
            .field("initial_sync_poll_interval", &self.initial_sync_poll_interval)
            .field("unknown_status", &self.unknown_status)
            .finish()
    }
}

impl ClientConfig {
    /// Create a config carrying an API key, everything else default.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Load from `SANDBOX_API_KEY` and, if set, `SANDBOX_ENDPOINT`.
    ///
    /// # Errors
    /// Returns error if the API key variable is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingEnv(API_KEY_ENV))?;
        let mut config = Self::new(api_key);
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint;
            }
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn with_pause_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.pause_timeout = timeout;
        self.pause_poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_sync_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.sync_timeout = timeout;
        self.sync_poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_initial_sync_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.initial_sync_timeout = timeout;
        self.initial_sync_poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_unknown_status(mut self, policy: UnknownStatusPolicy) -> Self {
        self.unknown_status = policy;
        self
    }

    /// Poller for pause and resume waits.
    #[must_use]
    pub fn pause_poller(&self) -> StatusPoller {
        StatusPoller::new(self.pause_timeout, self.pause_poll_interval)
            .with_attempt_timeout(self.request_timeout)
    }

    /// Poller for steady-state context sync.
    #[must_use]
    pub fn sync_poller(&self) -> StatusPoller {
        StatusPoller::new(self.sync_timeout, self.sync_poll_interval)
            .with_attempt_timeout(self.request_timeout)
    }

    /// Poller for the first sync after session creation.
    #[must_use]
    pub fn initial_sync_poller(&self) -> StatusPoller {
        StatusPoller::new(self.initial_sync_timeout, self.initial_sync_poll_interval)
            .with_attempt_timeout(self.request_timeout)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
