use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Configuration problems that disqualify a monitor from scheduling.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported URL scheme '{0}': only http and https are probed")]
    UnsupportedScheme(String),

    #[error("polling interval must be greater than zero seconds")]
    InvalidInterval,
}

/// A configured probe target: URL, polling interval and owner contact.
///
/// Monitors are created and edited outside the core; the scheduler only
/// observes snapshots of them and validates each one before binding a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub uuid: Uuid,
    pub name: String,
    pub url: String,
    /// Owner contact handed to the alert dispatcher on downtime.
    pub contact: String,
    pub interval_seconds: u64,
    pub enabled: bool,
}

impl Monitor {
    /// Check the scheduling invariants: interval > 0 and an absolute
    /// http/https URL. Violations skip this monitor only, never others.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.interval_seconds == 0 {
            return Err(MonitorError::InvalidInterval);
        }

        let url = Url::parse(&self.url).map_err(|source| MonitorError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;

        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(MonitorError::UnsupportedScheme(other.to_string())),
        }
    }
}
