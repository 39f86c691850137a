//! Service Supervisor
//!
//! Owns every service record and the runtime its workers run on.
//!
//! # State Machine
//!
//! ```text
//!   stopped ──start──► starting ──► running ──stop──► stopping ──► stopped
//!      ▲                  │            │                  │
//!      │                  ▼            ▼                  ▼ (deadline)
//!      └──restart──── crashed ◄── run error/panic     abandoned, stopped
//! ```
//!
//! # Workers
//!
//! Services share a private multi-threaded Tokio runtime, built on the first
//! start. `Service::run` is blocking code, so it goes to the runtime's
//! blocking pool through `spawn_blocking`; a small task awaits it and records
//! how it ended. A panic in `run` comes back as a `JoinError`.
//!
//! # Bounded Shutdown
//!
//! Stopping cancels the worker's `CancellationToken` and calls its `stop`
//! hook. [`Supervisor::stop_all`] cancels every worker first, then waits for
//! all of them against one shared deadline. [`Supervisor::request_stop_all`]
//! and [`Supervisor::poll_stop`] split the same work into a non-blocking
//! request and a non-blocking check, for callers that must keep ticking.
//!
//! A worker still alive at the deadline is detached. Its later state updates
//! land in a record that has already been replaced, so they cannot disturb a
//! restarted instance.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::ComponentSettings;
use crate::context::SharedContext;
use crate::error::panic_message;

use super::{Service, ServiceContext, ServiceError, ServiceState};

/// How a stop request ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker exited within the timeout
    Stopped,
    /// The worker did not exit in time and was detached
    Abandoned,
    /// Nothing was running
    NotRunning,
}

/// Result of `stop_all`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopSummary {
    /// Services that stopped cleanly
    pub stopped: Vec<String>,
    /// Services whose workers were detached
    pub abandoned: Vec<String>,
}

/// Point-in-time view of one service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Implementation key
    pub path: String,
    /// Whether `start_all` starts it
    pub enabled: bool,
    /// Current state
    pub state: ServiceState,
}

type SharedState = Arc<Mutex<ServiceState>>;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct ServiceRecord {
    name: String,
    settings: ComponentSettings,
    service: Arc<dyn Service>,
    state: SharedState,
    worker: Option<Worker>,
}

impl ServiceRecord {
    fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock() = state;
    }

    fn is_stopping(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_stopping)
    }

    /// Cancel the worker and call the stop hook; `false` if there is none
    fn signal_stop(&self) -> bool {
        let Some(worker) = &self.worker else {
            return false;
        };
        if worker.is_stopping() {
            return true;
        }
        {
            let mut state = self.state.lock();
            if *state == ServiceState::Running {
                *state = ServiceState::Stopping;
            }
        }
        worker.cancel.cancel();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.service.stop())) {
            tracing::warn!(
                service = %self.name,
                panic = %panic_message(payload.as_ref()),
                "Service stop hook panicked"
            );
        }
        true
    }

    fn finish(&mut self) {
        self.worker = None;
        let final_state = {
            let mut state = self.state.lock();
            if *state == ServiceState::Stopping {
                *state = ServiceState::Stopped;
            }
            *state
        };
        tracing::info!(service = %self.name, state = %final_state, "Service stopped");
    }

    fn abandon(&mut self, timeout: Duration) {
        // Dropping the handle detaches the task; it keeps the old state.
        self.worker = None;
        self.state = Arc::new(Mutex::new(ServiceState::Stopped));
        tracing::warn!(
            service = %self.name,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Service did not stop in time, abandoned"
        );
    }

    /// Wait up to `remaining` for a signalled worker
    async fn settle(&mut self, remaining: Duration, timeout: Duration) -> StopOutcome {
        let Some(worker) = self.worker.as_mut() else {
            return StopOutcome::NotRunning;
        };
        if tokio::time::timeout(remaining, &mut worker.handle).await.is_ok() {
            self.finish();
            StopOutcome::Stopped
        } else {
            self.abandon(timeout);
            StopOutcome::Abandoned
        }
    }
}

/// A stop-all request whose workers have not all been settled
#[derive(Debug, Clone, Copy)]
struct Drain {
    /// `None` when the timeout does not fit an `Instant`
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Drain {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            timeout,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline
            .map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
    }

    fn is_past(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Supervisor of background services
pub struct Supervisor {
    records: Vec<ServiceRecord>,
    bus: EventBus,
    app: SharedContext,
    runtime: Option<Runtime>,
    drain: Option<Drain>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("services", &self.snapshot())
            .field("draining", &self.drain.is_some())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Supervisor with no services
    #[must_use]
    pub fn new(bus: EventBus, app: SharedContext) -> Self {
        Self {
            records: Vec::new(),
            bus,
            app,
            runtime: None,
            drain: None,
        }
    }

    /// Add a service in `stopped` state
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Duplicate`] if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        settings: ComponentSettings,
        service: Arc<dyn Service>,
    ) -> Result<(), ServiceError> {
        let name = name.into();
        if self.index(&name).is_some() {
            return Err(ServiceError::Duplicate(name));
        }
        tracing::debug!(service = %name, path = %settings.path, enabled = settings.enabled, "Service registered");
        self.records.push(ServiceRecord {
            name,
            settings,
            service,
            state: Arc::new(Mutex::new(ServiceState::Stopped)),
            worker: None,
        });
        Ok(())
    }

    fn runtime(&mut self) -> std::io::Result<Handle> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.handle().clone());
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sentinel-svc")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        self.runtime = Some(runtime);
        Ok(handle)
    }

    /// Start every enabled service that is not running
    ///
    /// Failures are logged and returned; the remaining services still start.
    pub fn start_all(&mut self) -> Vec<ServiceError> {
        let names: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.settings.enabled && !r.state().is_active())
            .map(|r| r.name.clone())
            .collect();
        let failures: Vec<ServiceError> = names
            .iter()
            .filter_map(|name| self.start(name).err())
            .collect();
        tracing::info!(
            started = names.len() - failures.len(),
            failed = failures.len(),
            "Services started"
        );
        failures
    }

    /// Start one service
    ///
    /// # Errors
    ///
    /// Fails if the service is unknown or already running, if its `start`
    /// hook fails or panics, or if the service runtime cannot be built. In
    /// the last two cases the service is marked crashed.
    pub fn start(&mut self, name: &str) -> Result<(), ServiceError> {
        let index = self.require(name)?;
        if self.records[index].state().is_active() {
            return Err(ServiceError::AlreadyRunning(name.to_string()));
        }
        let runtime = match self.runtime() {
            Ok(handle) => handle,
            Err(source) => {
                let record = &self.records[index];
                record.set_state(ServiceState::Crashed);
                tracing::error!(service = %record.name, error = %source, "Service runtime could not be built");
                return Err(ServiceError::Spawn {
                    name: record.name.clone(),
                    source,
                });
            }
        };
        let bus = self.bus.clone();
        let app = self.app.clone();
        let record = &mut self.records[index];
        // a worker that already exited on its own
        record.worker = None;

        record.set_state(ServiceState::Starting);
        let cancel = CancellationToken::new();
        let ctx = ServiceContext::new(
            record.name.clone(),
            record.settings.settings.clone(),
            bus,
            app,
            cancel.clone(),
            runtime.clone(),
        );

        let service = Arc::clone(&record.service);
        let started = panic::catch_unwind(AssertUnwindSafe(|| service.start(&ctx)))
            .unwrap_or_else(|payload| Err(ServiceError::failed(panic_message(payload.as_ref()))));
        if let Err(e) = started {
            record.set_state(ServiceState::Crashed);
            tracing::error!(service = %record.name, error = %e, "Service failed to start");
            return Err(ServiceError::StartFailed {
                name: record.name.clone(),
                message: e.to_string(),
            });
        }

        record.set_state(ServiceState::Running);
        let state = Arc::clone(&record.state);
        let worker_name = record.name.clone();
        let body = runtime.spawn_blocking(move || service.run(ctx));
        let handle = runtime.spawn(async move {
            let outcome = body.await;
            let mut state = state.lock();
            match outcome {
                Ok(Ok(())) => {
                    if *state == ServiceState::Running {
                        *state = ServiceState::Stopped;
                        tracing::info!(service = %worker_name, "Service finished on its own");
                    }
                }
                Ok(Err(e)) => {
                    *state = ServiceState::Crashed;
                    tracing::error!(service = %worker_name, error = %e, "Service crashed");
                }
                Err(join) => {
                    *state = ServiceState::Crashed;
                    let reason = if join.is_panic() {
                        panic_message(join.into_panic().as_ref())
                    } else {
                        join.to_string()
                    };
                    tracing::error!(service = %worker_name, panic = %reason, "Service panicked");
                }
            }
        });

        record.worker = Some(Worker { cancel, handle });
        tracing::info!(service = %record.name, "Service running");
        Ok(())
    }

    /// Stop one service, waiting at most `timeout` for its worker
    ///
    /// # Errors
    ///
    /// Fails only if the service is unknown.
    pub async fn stop(&mut self, name: &str, timeout: Duration) -> Result<StopOutcome, ServiceError> {
        let index = self.require(name)?;
        let record = &mut self.records[index];
        if !record.signal_stop() {
            return Ok(StopOutcome::NotRunning);
        }
        Ok(record.settle(timeout, timeout).await)
    }

    /// Cancel every worker without waiting
    ///
    /// The deadline starts now. A request made while an earlier one is still
    /// draining keeps the earlier deadline. Follow up with
    /// [`Supervisor::poll_stop`] or [`Supervisor::stop_all`].
    pub fn request_stop_all(&mut self, timeout: Duration) {
        let mut signalled = 0_usize;
        for record in self.records.iter().rev() {
            if record.signal_stop() {
                signalled += 1;
            }
        }
        let drain = *self.drain.get_or_insert_with(|| Drain::new(timeout));
        tracing::debug!(
            signalled,
            timeout_ms = u64::try_from(drain.timeout.as_millis()).unwrap_or(u64::MAX),
            "Stop requested for all services"
        );
    }

    /// Settle a pending [`Supervisor::request_stop_all`] without blocking
    ///
    /// Returns `None` while a signalled worker is still alive and the
    /// deadline has not passed, or when no request is pending. Otherwise the
    /// finished workers are reaped, the rest are abandoned, and the summary
    /// is returned.
    pub fn poll_stop(&mut self) -> Option<StopSummary> {
        let drain = self.drain?;
        let waiting = self.records.iter().any(|r| {
            r.worker
                .as_ref()
                .is_some_and(|w| w.is_stopping() && !w.handle.is_finished())
        });
        if waiting && !drain.is_past() {
            return None;
        }
        self.drain = None;

        let mut summary = StopSummary::default();
        for record in self.records.iter_mut().rev() {
            let Some(worker) = &record.worker else {
                continue;
            };
            if !worker.is_stopping() {
                continue;
            }
            if worker.handle.is_finished() {
                record.finish();
                summary.stopped.push(record.name.clone());
            } else {
                record.abandon(drain.timeout);
                summary.abandoned.push(record.name.clone());
            }
        }
        log_summary(&summary);
        Some(summary)
    }

    /// Stop every service, waiting at most `timeout` in total
    ///
    /// All workers are cancelled before any is waited on, so the whole call
    /// is bounded by one deadline rather than one per service. Summary order
    /// is reverse registration order.
    pub async fn stop_all(&mut self, timeout: Duration) -> StopSummary {
        self.request_stop_all(timeout);
        let drain = self.drain.take().unwrap_or_else(|| Drain::new(timeout));

        let mut summary = StopSummary::default();
        for record in self.records.iter_mut().rev() {
            if !record.is_stopping() {
                continue;
            }
            match record.settle(drain.remaining(), drain.timeout).await {
                StopOutcome::Stopped => summary.stopped.push(record.name.clone()),
                StopOutcome::Abandoned => summary.abandoned.push(record.name.clone()),
                StopOutcome::NotRunning => {}
            }
        }
        log_summary(&summary);
        summary
    }

    /// Whether a stop request is waiting to be settled
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.drain.is_some()
    }

    /// Stop then start one service
    ///
    /// # Errors
    ///
    /// Fails if the service is unknown or cannot be started again.
    pub async fn restart(&mut self, name: &str, timeout: Duration) -> Result<StopOutcome, ServiceError> {
        let outcome = self.stop(name, timeout).await?;
        tracing::info!(service = %name, "Restarting service");
        self.start(name)?;
        Ok(outcome)
    }

    /// Current state of one service
    #[must_use]
    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.index(name).map(|i| self.records[i].state())
    }

    /// Status of every service in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        self.records
            .iter()
            .map(|r| ServiceStatus {
                name: r.name.clone(),
                path: r.settings.path.clone(),
                enabled: r.settings.enabled,
                state: r.state(),
            })
            .collect()
    }

    /// Registered service names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    /// Number of registered services
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no service is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.name == name)
    }

    fn require(&self, name: &str) -> Result<usize, ServiceError> {
        self.index(name)
            .ok_or_else(|| ServiceError::Unknown(name.to_string()))
    }
}

fn log_summary(summary: &StopSummary) {
    if summary.abandoned.is_empty() {
        tracing::info!(stopped = summary.stopped.len(), "Services stopped");
    } else {
        tracing::warn!(
            stopped = summary.stopped.len(),
            abandoned = ?summary.abandoned,
            "Services stopped, some abandoned"
        );
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for record in &self.records {
            if let Some(worker) = &record.worker {
                worker.cancel.cancel();
            }
        }
        // Never blocks, so dropping inside an async context is fine.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::context::{AppContext, ThemeColors};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Publishes a heartbeat until cancelled
    #[derive(Default)]
    struct Heartbeat {
        stops: AtomicUsize,
    }

    impl Service for Heartbeat {
        fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
            while !ctx.wait_cancelled(Duration::from_millis(5)) {
                ctx.publish_kind("heartbeat", ());
            }
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RefusesToStart;

    impl Service for RefusesToStart {
        fn start(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
            Err(ServiceError::failed("no broker"))
        }

        fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    struct FailsWhileRunning;

    impl Service for FailsWhileRunning {
        fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            Err(ServiceError::failed("socket closed"))
        }
    }

    struct Panics;

    impl Service for Panics {
        fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            panic!("worker exploded");
        }
    }

    /// Ignores cancellation until released
    struct Stubborn {
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl Service for Stubborn {
        fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            if let Some(release) = self.release.lock().take() {
                let _ = release.recv_timeout(Duration::from_secs(10));
            }
            Ok(())
        }
    }

    /// Ignores cancellation forever
    struct Deaf;

    impl Service for Deaf {
        fn run(&self, _ctx: ServiceContext) -> Result<(), ServiceError> {
            loop {
                std::thread::park();
            }
        }
    }

    fn supervisor() -> (Supervisor, EventBus) {
        let bus = EventBus::new();
        let app = AppContext::shared(CoreSettings::default(), ThemeColors::default());
        (Supervisor::new(bus.clone(), app), bus)
    }

    async fn wait_for(supervisor: &Supervisor, name: &str, state: ServiceState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if supervisor.state(name) == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut sup, bus) = supervisor();
        let beats = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&beats);
        bus.subscribe("services.pulse.heartbeat", move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let service = Arc::new(Heartbeat::default());
        sup.register("pulse", ComponentSettings::new("heartbeat"), service.clone())
            .unwrap();
        assert_eq!(sup.state("pulse"), Some(ServiceState::Stopped));

        assert!(sup.start_all().is_empty());
        assert_eq!(sup.state("pulse"), Some(ServiceState::Running));
        assert!(matches!(sup.start("pulse"), Err(ServiceError::AlreadyRunning(_))));

        let deadline = Instant::now() + Duration::from_secs(5);
        while beats.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(beats.load(Ordering::SeqCst) > 0);

        let summary = sup.stop_all(Duration::from_secs(2)).await;
        assert_eq!(summary.stopped, vec!["pulse"]);
        assert_eq!(sup.state("pulse"), Some(ServiceState::Stopped));
        assert_eq!(service.stops.load(Ordering::SeqCst), 1);
        assert!(!sup.is_draining());
    }

    #[tokio::test]
    async fn test_start_failure_does_not_stop_others() {
        let (mut sup, _) = supervisor();
        sup.register("mqtt", ComponentSettings::new("x"), Arc::new(RefusesToStart))
            .unwrap();
        sup.register("pulse", ComponentSettings::new("x"), Arc::new(Heartbeat::default()))
            .unwrap();

        let failures = sup.start_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].as_label(), "service_start_failed");
        assert_eq!(sup.state("mqtt"), Some(ServiceState::Crashed));
        assert_eq!(sup.state("pulse"), Some(ServiceState::Running));
        sup.stop_all(Duration::from_secs(2)).await;
    }

    #[test]
    fn test_disabled_services_are_not_started() {
        let (mut sup, _) = supervisor();
        sup.register("off", ComponentSettings::new("x").disabled(), Arc::new(Heartbeat::default()))
            .unwrap();
        assert!(sup.start_all().is_empty());
        assert_eq!(sup.state("off"), Some(ServiceState::Stopped));
        assert!(!sup.snapshot()[0].enabled);
    }

    #[tokio::test]
    async fn test_run_error_and_panic_mark_crashed() {
        let (mut sup, _) = supervisor();
        sup.register("fails", ComponentSettings::new("x"), Arc::new(FailsWhileRunning))
            .unwrap();
        sup.register("panics", ComponentSettings::new("x"), Arc::new(Panics))
            .unwrap();
        sup.start_all();

        assert!(wait_for(&sup, "fails", ServiceState::Crashed).await);
        assert!(wait_for(&sup, "panics", ServiceState::Crashed).await);

        // a crashed service can be started again
        sup.start("fails").unwrap();
        assert!(wait_for(&sup, "fails", ServiceState::Crashed).await);
    }

    #[tokio::test]
    async fn test_stop_timeout_abandons_worker() {
        let (mut sup, _) = supervisor();
        let (release_tx, release_rx) = mpsc::channel();
        sup.register(
            "stubborn",
            ComponentSettings::new("x"),
            Arc::new(Stubborn {
                release: Mutex::new(Some(release_rx)),
            }),
        )
        .unwrap();
        sup.start("stubborn").unwrap();

        let started = Instant::now();
        let outcome = sup.stop("stubborn", Duration::from_millis(50)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Abandoned);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sup.state("stubborn"), Some(ServiceState::Stopped));

        // the detached worker finishing later does not touch the record
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sup.state("stubborn"), Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_stop_all_shares_one_deadline() {
        let (mut sup, _) = supervisor();
        for name in ["a", "b", "c"] {
            sup.register(name, ComponentSettings::new("x"), Arc::new(Deaf)).unwrap();
        }
        assert!(sup.start_all().is_empty());

        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let summary = sup.stop_all(timeout).await;
        let elapsed = started.elapsed();

        assert_eq!(summary.abandoned, vec!["c", "b", "a"]);
        assert!(elapsed >= timeout);
        // one deadline for all three, not one each
        assert!(elapsed < timeout * 2, "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_request_stop_all_never_blocks() {
        let (mut sup, _) = supervisor();
        sup.register("deaf", ComponentSettings::new("x"), Arc::new(Deaf)).unwrap();
        sup.register("pulse", ComponentSettings::new("x"), Arc::new(Heartbeat::default()))
            .unwrap();
        sup.start_all();

        let started = Instant::now();
        sup.request_stop_all(Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(sup.is_draining());
        assert_eq!(sup.state("deaf"), Some(ServiceState::Stopping));
        assert_eq!(sup.poll_stop(), None);

        let summary = loop {
            if let Some(summary) = sup.poll_stop() {
                break summary;
            }
            assert!(started.elapsed() < Duration::from_secs(5));
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(summary.stopped, vec!["pulse"]);
        assert_eq!(summary.abandoned, vec!["deaf"]);
        assert_eq!(sup.state("deaf"), Some(ServiceState::Stopped));
        assert!(!sup.is_draining());
        assert_eq!(sup.poll_stop(), None);
    }

    #[tokio::test]
    async fn test_restart() {
        let (mut sup, _) = supervisor();
        sup.register("pulse", ComponentSettings::new("x"), Arc::new(Heartbeat::default()))
            .unwrap();
        assert_eq!(
            sup.restart("pulse", Duration::from_secs(1)).await.unwrap(),
            StopOutcome::NotRunning
        );
        assert_eq!(
            sup.restart("pulse", Duration::from_secs(1)).await.unwrap(),
            StopOutcome::Stopped
        );
        assert_eq!(sup.state("pulse"), Some(ServiceState::Running));
        sup.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate() {
        let (mut sup, _) = supervisor();
        sup.register("a", ComponentSettings::new("x"), Arc::new(Panics)).unwrap();
        assert!(matches!(
            sup.register("a", ComponentSettings::new("x"), Arc::new(Panics)),
            Err(ServiceError::Duplicate(_))
        ));
        assert!(matches!(sup.start("zzz"), Err(ServiceError::Unknown(_))));
        assert_eq!(
            sup.stop("a", Duration::ZERO).await.unwrap(),
            StopOutcome::NotRunning
        );
    }
}
