use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection-phase durations measured during one probe, all relative to the
/// instant the probe started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Time until DNS resolution completed.
    pub dns_lookup_ms: u64,

    /// Time until the TCP connection was established.
    pub tcp_handshake_ms: u64,

    /// Time until the TLS handshake completed (0 for plain HTTP).
    pub tls_handshake_ms: u64,

    /// Time until the full response body was received.
    pub total_ms: u64,
}

/// Outcome of a single probe. Immutable once built; written exactly once to
/// the result sink per probe attempt, failures included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// UUID of the monitor that was probed
    pub monitor_id: Uuid,

    /// Timestamp when the probe was started
    pub timestamp: DateTime<Utc>,

    /// HTTP status code (0 if no response was received)
    pub status_code: u16,

    /// Total response time in milliseconds (0 on transport failure)
    pub response_time_ms: u64,

    /// DNS lookup duration in milliseconds
    pub dns_lookup_ms: u64,

    /// TCP handshake duration in milliseconds
    pub tcp_handshake_ms: u64,

    /// TLS handshake duration in milliseconds (0 for plain HTTP)
    pub tls_handshake_ms: u64,

    /// Whether the probe is counted as uptime (status in [200, 400))
    pub success: bool,

    /// Error description when the probe failed
    pub error_message: Option<String>,
}

impl ProbeResult {
    /// Create a pending result for one probe attempt. All numeric fields
    /// start at zero and `success` at false, which is exactly the record a
    /// transport failure persists.
    pub fn new(monitor_id: Uuid) -> Self {
        Self {
            monitor_id,
            timestamp: Utc::now(),
            status_code: 0,
            response_time_ms: 0,
            dns_lookup_ms: 0,
            tcp_handshake_ms: 0,
            tls_handshake_ms: 0,
            success: false,
            error_message: None,
        }
    }

    /// Record a completed HTTP exchange. Status codes in [200, 400) count as
    /// success; anything else keeps the measured timings and real status code
    /// but marks the probe as failed.
    pub fn completed(mut self, status_code: u16, timings: PhaseTimings) -> Self {
        self.status_code = status_code;
        self.response_time_ms = timings.total_ms;
        self.dns_lookup_ms = timings.dns_lookup_ms;
        self.tcp_handshake_ms = timings.tcp_handshake_ms;
        self.tls_handshake_ms = timings.tls_handshake_ms;
        self.success = (200..400).contains(&status_code);
        if !self.success {
            self.error_message = Some(format!("unexpected status code {status_code}"));
        }
        self
    }

    /// Record a transport-level failure (DNS, connect, TLS, timeout): no
    /// status code, no timings.
    pub fn failure(mut self, error: String) -> Self {
        self.success = false;
        self.error_message = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_in_success_range() {
        let timings = PhaseTimings { total_ms: 120, ..PhaseTimings::default() };
        for status in [200, 204, 301, 302, 399] {
            let result = ProbeResult::new(Uuid::new_v4()).completed(status, timings);
            assert!(result.success, "status {status} should be success");
            assert_eq!(result.status_code, status);
            assert_eq!(result.response_time_ms, 120);
            assert!(result.error_message.is_none());
        }
    }

    #[test]
    fn error_statuses_keep_timings_but_fail() {
        let timings = PhaseTimings {
            dns_lookup_ms: 5,
            tcp_handshake_ms: 12,
            tls_handshake_ms: 40,
            total_ms: 90,
        };
        let result = ProbeResult::new(Uuid::new_v4()).completed(500, timings);
        assert!(!result.success);
        assert_eq!(result.status_code, 500);
        assert_eq!(result.response_time_ms, 90);
        assert!(result.error_message.unwrap().contains("500"));
    }

    #[test]
    fn transport_failure_zeroes_everything() {
        let result = ProbeResult::new(Uuid::new_v4()).failure("connection refused".into());
        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert_eq!(result.response_time_ms, 0);
        assert_eq!(result.dns_lookup_ms, 0);
        assert_eq!(result.tcp_handshake_ms, 0);
        assert_eq!(result.tls_handshake_ms, 0);
        assert_eq!(result.error_message.as_deref(), Some("connection refused"));
    }
}
