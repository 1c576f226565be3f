/// Monitoring engine module - periodic uptime probing
///
/// This module is responsible for:
/// - Executing phase-timed HTTP/HTTPS probes
/// - Scheduling one recurring probe task per monitor
/// - Handing results to the persistence and alerting collaborators
pub mod probe;
pub mod scheduler;
pub mod types;

pub use probe::ProbeExecutor;
pub use scheduler::Scheduler;
pub use types::ProbeResult;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Monitor;

/// Source of the current monitor snapshot. Read at startup and whenever a
/// reconciliation is triggered; never written by the core.
#[async_trait]
pub trait MonitorRegistry: Send + Sync {
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;
}

/// Append-only store for probe outcomes. One write per probe attempt.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, result: &ProbeResult) -> Result<()>;
}

/// One-way downtime notification. The transport (email, webhook, ...) lives
/// behind this trait; the core only supplies the payload.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn notify(&self, contact: &str, monitor_name: &str, url: &str) -> Result<()>;
}

/// A single probe attempt against one monitor. Implementations convert every
/// failure into a `ProbeResult` with `success == false`; they never return
/// an error past this boundary.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, monitor: &Monitor) -> ProbeResult;
}
