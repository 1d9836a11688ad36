use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Largest accepted timeout, in milliseconds (`2^53 - 1`).
pub const MAX_TIMEOUT_MS: u64 = (1 << 53) - 1;

/// Idle timeout applied when neither the client nor the call sets one.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Timeout settings for one exchange, in milliseconds.
///
/// `request_timeout` bounds the whole exchange from request issuance to the
/// last body byte. `idle_timeout` bounds the silence between two body chunks.
/// A value of `0` (or `None`) leaves the corresponding bound off.
///
/// # Example
///
/// ```
/// use datalith_client::Timeouts;
///
/// let timeouts = Timeouts::new().request_timeout(60_000).idle_timeout(5_000);
/// assert!(timeouts.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Total duration allowed for the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Maximum gap between two body chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
}

impl Timeouts {
    /// Create an empty set of timeouts (both inherited from the client).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total request timeout.
    #[must_use]
    pub fn request_timeout(mut self, millis: u64) -> Self {
        self.request_timeout = Some(millis);
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, millis: u64) -> Self {
        self.idle_timeout = Some(millis);
        self
    }

    /// Fill unset fields from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            request_timeout: self.request_timeout.or(fallback.request_timeout),
            idle_timeout: self.idle_timeout.or(fallback.idle_timeout),
        }
    }

    /// Check that both values are inside `0..=MAX_TIMEOUT_MS`.
    pub fn validate(&self) -> Result<(), Error> {
        for value in [self.request_timeout, self.idle_timeout].into_iter().flatten() {
            if value > MAX_TIMEOUT_MS {
                return Err(Error::InvalidTimeout(value));
            }
        }
        Ok(())
    }

    /// The total bound, or `None` when unbounded.
    pub(crate) fn request_duration(&self) -> Option<Duration> {
        self.request_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// The idle bound, or `None` when disabled.
    pub(crate) fn idle_duration(&self) -> Option<Duration> {
        self.idle_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// File-level client configuration.
///
/// # Example
///
/// ```toml
/// base_url = "http://127.0.0.1:1111"
/// request_timeout = 120000
/// idle_timeout = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the store's API.
    pub base_url: String,
    /// Default total request timeout in milliseconds (`0` = unbounded).
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Default idle timeout in milliseconds (`0` = disabled).
    #[serde(default)]
    pub idle_timeout: Option<u64>,
    /// Value of the `User-Agent` header.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for the given base URL with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: None,
            idle_timeout: None,
            user_agent: None,
        }
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// The client-wide default timeouts this configuration describes.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            request_timeout: self.request_timeout,
            idle_timeout: self.idle_timeout,
        }
    }
}
