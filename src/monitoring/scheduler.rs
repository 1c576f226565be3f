use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::ProbeResult;
use super::{AlertDispatcher, MonitorRegistry, Prober, ResultSink};
use crate::models::Monitor;

const RESULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler was already started")]
    AlreadyStarted,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("failed to load monitors from registry: {0:#}")]
    Registry(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Running,
    Stopped,
}

/// The live timer binding for one monitor: its current interval, the token
/// that stops future ticks, and the task driving the loop.
struct ScheduledJob {
    interval_seconds: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A probe outcome travelling to the recorder, with enough of the monitor
/// attached to build an alert payload.
struct CompletedProbe {
    monitor: Monitor,
    result: ProbeResult,
}

/// Owns one recurring probe task per monitor and the map binding them.
///
/// The job map is private and mutated only through `start`, `reconcile` and
/// `stop`, which upholds the core invariant: at most one live job per monitor
/// id at any instant. Probe tasks never touch the map; they only send
/// results to the recorder task, which persists them in arrival order (and
/// therefore in initiation order per monitor) and raises alerts on failures.
///
/// Overlap policy: probes run inline in their job task with the executor's
/// timeout, and timers skip missed ticks, so two probes for the same monitor
/// never run concurrently. Cancellation is observed between ticks only; a
/// probe already in flight completes and still records its result.
pub struct Scheduler {
    prober: Arc<dyn Prober>,
    jobs: HashMap<Uuid, ScheduledJob>,
    result_tx: Option<mpsc::Sender<CompletedProbe>>,
    recorder: Option<JoinHandle<()>>,
    state: State,
}

impl Scheduler {
    /// Create a scheduler wired to its collaborators. The recorder task is
    /// spawned here and drains results until `stop` closes the channel.
    pub fn new(
        prober: Arc<dyn Prober>,
        sink: Arc<dyn ResultSink>,
        alerter: Arc<dyn AlertDispatcher>,
    ) -> Self {
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let recorder = tokio::spawn(record_results(result_rx, sink, alerter));

        Self {
            prober,
            jobs: HashMap::new(),
            result_tx: Some(result_tx),
            recorder: Some(recorder),
            state: State::NotStarted,
        }
    }

    /// Load the current snapshot from the registry and create one job per
    /// valid monitor. An unreachable registry is the only fatal error: it is
    /// surfaced to the caller and no jobs are created. Retrying is the
    /// caller's decision.
    pub async fn start(&mut self, registry: &dyn MonitorRegistry) -> Result<(), SchedulerError> {
        if self.state != State::NotStarted {
            return Err(SchedulerError::AlreadyStarted);
        }

        let monitors = registry.list_monitors().await.map_err(SchedulerError::Registry)?;

        self.state = State::Running;
        self.apply(monitors);
        tracing::info!("monitoring started with {} scheduled job(s)", self.jobs.len());
        Ok(())
    }

    /// Diff a refreshed snapshot against the live jobs: keep jobs whose
    /// interval is unchanged, replace jobs whose interval changed, cancel
    /// jobs for removed monitors and create jobs for new ones. Calling this
    /// with an unchanged snapshot is a no-op.
    pub fn reconcile(&mut self, monitors: Vec<Monitor>) -> Result<(), SchedulerError> {
        if self.state != State::Running {
            return Err(SchedulerError::NotRunning);
        }
        self.apply(monitors);
        Ok(())
    }

    /// Cancel every job and wait for its task to exit, so that once this
    /// returns no further probe executions can start and any probe that was
    /// in flight has completed and recorded its result. The recorder is
    /// drained last so nothing queued is lost.
    pub async fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.state = State::Stopped;

        let mut handles = Vec::with_capacity(self.jobs.len());
        for (_, job) in self.jobs.drain() {
            job.cancel.cancel();
            handles.push(job.handle);
        }
        join_all(handles).await;

        // Dropping the last sender lets the recorder run dry and exit.
        drop(self.result_tx.take());
        if let Some(recorder) = self.recorder.take() {
            let _ = recorder.await;
        }
        tracing::info!("monitoring stopped");
    }

    fn apply(&mut self, monitors: Vec<Monitor>) {
        let Some(result_tx) = self.result_tx.clone() else {
            return;
        };

        let mut desired: HashMap<Uuid, Monitor> = HashMap::with_capacity(monitors.len());
        for monitor in monitors {
            if let Err(e) = monitor.validate() {
                tracing::warn!("skipping monitor '{}' ({}): {e}", monitor.name, monitor.uuid);
                continue;
            }
            desired.insert(monitor.uuid, monitor);
        }

        let removed: Vec<Uuid> =
            self.jobs.keys().filter(|id| !desired.contains_key(id)).copied().collect();
        for id in removed {
            if let Some(job) = self.jobs.remove(&id) {
                job.cancel.cancel();
                tracing::info!("cancelled job for removed monitor {id}");
            }
        }

        for (id, monitor) in desired {
            match self.jobs.get(&id) {
                Some(job) if job.interval_seconds == monitor.interval_seconds => {}
                Some(_) => {
                    // Cancel before spawning the replacement so no tick of
                    // the old timer can fire past this point.
                    if let Some(job) = self.jobs.remove(&id) {
                        job.cancel.cancel();
                    }
                    tracing::info!(
                        "rescheduling monitor '{}' at {}s interval",
                        monitor.name,
                        monitor.interval_seconds
                    );
                    let job = spawn_job(self.prober.clone(), result_tx.clone(), monitor);
                    self.jobs.insert(id, job);
                }
                None => {
                    tracing::info!(
                        "scheduling monitor '{}' every {}s",
                        monitor.name,
                        monitor.interval_seconds
                    );
                    let job = spawn_job(self.prober.clone(), result_tx.clone(), monitor);
                    self.jobs.insert(id, job);
                }
            }
        }
    }
}

/// Spawn the recurring probe task for one monitor. The first tick fires one
/// interval after scheduling, then every interval; missed ticks are skipped
/// rather than bursted, so a slow probe never stacks probes behind itself.
fn spawn_job(
    prober: Arc<dyn Prober>,
    result_tx: mpsc::Sender<CompletedProbe>,
    monitor: Monitor,
) -> ScheduledJob {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let interval_seconds = monitor.interval_seconds;

    let handle = tokio::spawn(async move {
        let period = Duration::from_secs(interval_seconds);
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = timer.tick() => {}
            }
            // The tick may have won a race against cancellation.
            if token.is_cancelled() {
                break;
            }

            let result = prober.probe(&monitor).await;
            let report = CompletedProbe { monitor: monitor.clone(), result };
            if result_tx.send(report).await.is_err() {
                tracing::error!("result channel closed, stopping job for {}", monitor.uuid);
                break;
            }
        }
    });

    ScheduledJob { interval_seconds, cancel, handle }
}

/// Single consumer for all probe outcomes: persist each one, alert on
/// failures. Collaborator errors are logged and contained; they never abort
/// a timer loop or leak into other monitors' jobs.
async fn record_results(
    mut result_rx: mpsc::Receiver<CompletedProbe>,
    sink: Arc<dyn ResultSink>,
    alerter: Arc<dyn AlertDispatcher>,
) {
    while let Some(report) = result_rx.recv().await {
        if let Err(e) = sink.record(&report.result).await {
            tracing::error!(
                "failed to persist probe result for monitor {}: {e:#}",
                report.result.monitor_id
            );
        }

        if !report.result.success {
            let monitor = &report.monitor;
            if let Err(e) = alerter.notify(&monitor.contact, &monitor.name, &monitor.url).await {
                tracing::error!("failed to dispatch alert for monitor '{}': {e:#}", monitor.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::PhaseTimings;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticRegistry {
        monitors: Vec<Monitor>,
    }

    #[async_trait]
    impl MonitorRegistry for StaticRegistry {
        async fn list_monitors(&self) -> Result<Vec<Monitor>> {
            Ok(self.monitors.clone())
        }
    }

    struct UnreachableRegistry;

    #[async_trait]
    impl MonitorRegistry for UnreachableRegistry {
        async fn list_monitors(&self) -> Result<Vec<Monitor>> {
            Err(anyhow!("registry unreachable"))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        results: Mutex<Vec<ProbeResult>>,
    }

    impl MemorySink {
        fn recorded(&self) -> Vec<ProbeResult> {
            self.results.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResultSink for MemorySink {
        async fn record(&self, result: &ProbeResult) -> Result<()> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryAlerter {
        alerts: Mutex<Vec<(String, String, String)>>,
    }

    impl MemoryAlerter {
        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AlertDispatcher for MemoryAlerter {
        async fn notify(&self, contact: &str, monitor_name: &str, url: &str) -> Result<()> {
            self.alerts.lock().unwrap().push((
                contact.to_string(),
                monitor_name.to_string(),
                url.to_string(),
            ));
            Ok(())
        }
    }

    /// Instant canned outcomes instead of network probes; an optional delay
    /// simulates a slow target.
    struct MockProber {
        succeed: bool,
        delay: Duration,
    }

    impl MockProber {
        fn up() -> Self {
            Self { succeed: true, delay: Duration::ZERO }
        }

        fn down() -> Self {
            Self { succeed: false, delay: Duration::ZERO }
        }

        fn slow(delay: Duration) -> Self {
            Self { succeed: true, delay }
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(&self, monitor: &Monitor) -> ProbeResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = ProbeResult::new(monitor.uuid);
            if self.succeed {
                result.completed(200, PhaseTimings { total_ms: 5, ..PhaseTimings::default() })
            } else {
                result.failure("connection refused".to_string())
            }
        }
    }

    fn monitor(interval_seconds: u64) -> Monitor {
        Monitor {
            uuid: Uuid::new_v4(),
            name: "example".to_string(),
            url: "https://example.com".to_string(),
            contact: "owner@example.com".to_string(),
            interval_seconds,
            enabled: true,
        }
    }

    struct Harness {
        scheduler: Scheduler,
        sink: Arc<MemorySink>,
        alerter: Arc<MemoryAlerter>,
    }

    fn harness(prober: MockProber) -> Harness {
        let sink = Arc::new(MemorySink::default());
        let alerter = Arc::new(MemoryAlerter::default());
        let scheduler = Scheduler::new(Arc::new(prober), sink.clone(), alerter.clone());
        Harness { scheduler, sink, alerter }
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn probes_fire_at_the_configured_interval() {
        let mut h = harness(MockProber::up());
        let registry = StaticRegistry { monitors: vec![monitor(30)] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(95)).await;

        // Ticks at 30, 60 and 90 seconds.
        assert_eq!(h.sink.recorded().len(), 3);
        assert_eq!(h.alerter.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_registry_fails_start_and_creates_no_jobs() {
        let mut h = harness(MockProber::up());

        let err = h.scheduler.start(&UnreachableRegistry).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Registry(_)));

        advance(Duration::from_secs(120)).await;
        assert!(h.sink.recorded().is_empty());

        // Start was not consumed: a later retry against a reachable registry
        // still works.
        let registry = StaticRegistry { monitors: vec![monitor(10)] };
        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(15)).await;
        assert_eq!(h.sink.recorded().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_failed_probe_records_and_alerts_exactly_once() {
        let mut h = harness(MockProber::down());
        let target = monitor(10);
        let registry = StaticRegistry { monitors: vec![target.clone()] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(25)).await;

        let results = h.sink.recorded();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success && r.status_code == 0));

        let alerts = h.alerter.alerts.lock().unwrap().clone();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0], (target.contact.clone(), target.name.clone(), target.url.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_with_unchanged_snapshot_keeps_the_timer_phase() {
        let mut h = harness(MockProber::up());
        let target = monitor(30);
        let registry = StaticRegistry { monitors: vec![target.clone()] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(45)).await;
        assert_eq!(h.sink.recorded().len(), 1);

        // Identical snapshot: the job must be left untouched, so the next
        // ticks stay at 60 and 90 seconds (a replaced timer would fire at 75).
        h.scheduler.reconcile(vec![target]).unwrap();
        advance(Duration::from_secs(50)).await;
        assert_eq!(h.sink.recorded().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_replaces_the_timer_without_double_fire() {
        let mut h = harness(MockProber::up());
        let mut target = monitor(30);
        let registry = StaticRegistry { monitors: vec![target.clone()] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(35)).await;
        assert_eq!(h.sink.recorded().len(), 1);

        target.interval_seconds = 5;
        h.scheduler.reconcile(vec![target]).unwrap();

        // New 5s cadence counted from the reconcile call (t=35): ticks at
        // 40, 45, 50 and 55. The old 30s timer would have added one at 60.
        advance(Duration::from_secs(21)).await;
        assert_eq!(h.sink.recorded().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_monitor_probes_no_more() {
        let mut h = harness(MockProber::up());
        let keep = monitor(10);
        let drop_me = monitor(10);
        let registry = StaticRegistry { monitors: vec![keep.clone(), drop_me.clone()] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(15)).await;
        assert_eq!(h.sink.recorded().len(), 2);

        h.scheduler.reconcile(vec![keep.clone()]).unwrap();
        advance(Duration::from_secs(30)).await;

        let results = h.sink.recorded();
        assert!(results.iter().skip(2).all(|r| r.monitor_id == keep.uuid));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_probe_completes_after_its_job_is_cancelled() {
        let mut h = harness(MockProber::slow(Duration::from_secs(10)));
        let target = monitor(30);
        let registry = StaticRegistry { monitors: vec![target.clone()] };

        h.scheduler.start(&registry).await.unwrap();

        // Probe starts at t=30 and finishes at t=40; remove the monitor at
        // t=35 while it is in flight.
        advance(Duration::from_secs(35)).await;
        h.scheduler.reconcile(Vec::new()).unwrap();
        assert!(h.sink.recorded().is_empty());

        advance(Duration::from_secs(10)).await;
        assert_eq!(h.sink.recorded().len(), 1);

        // And nothing after the straggler.
        advance(Duration::from_secs(120)).await;
        assert_eq!(h.sink.recorded().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_probes_and_halts_all_jobs() {
        let mut h = harness(MockProber::up());
        let registry = StaticRegistry { monitors: vec![monitor(10), monitor(20)] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(25)).await;
        let before = h.sink.recorded().len();
        assert_eq!(before, 3);

        h.scheduler.stop().await;
        advance(Duration::from_secs(120)).await;
        assert_eq!(h.sink.recorded().len(), before);

        assert!(matches!(
            h.scheduler.reconcile(vec![monitor(10)]),
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_monitors_are_skipped_without_aborting_others() {
        let mut h = harness(MockProber::up());
        let valid = monitor(10);
        let mut broken = monitor(0);
        broken.url = "https://example.org".to_string();
        let registry = StaticRegistry { monitors: vec![valid.clone(), broken] };

        h.scheduler.start(&registry).await.unwrap();
        advance(Duration::from_secs(35)).await;

        let results = h.sink.recorded();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.monitor_id == valid.uuid));
    }
}
