//! Frame Driver - The Cooperative Main Loop
//!
//! Owns every core component and ticks them forward at a fixed rate. All
//! module code runs here, on one thread; services publish from their own
//! threads and their events reach modules through mailboxes.
//!
//! # Tick
//!
//! ```text
//!   clock ──► dt
//!              │
//!   system mailbox ── system.restart ──► hard reset
//!              │   └─ ui.alert ──────► AppContext alert state
//!              │
//!   Supervisor::poll_stop ──► services back up once a reset has drained
//!              │
//!   module mailboxes ──► Module::on_bus_event (shown and hidden)
//!              │
//!   ReportBoard::expire ──► live reports
//!              │
//!   ArbitrationEngine::evaluate ──► Decision ──► activate / deactivate
//!              │
//!   ModuleRegistry::dispatch_frame ──► update, render, input (shown only)
//! ```
//!
//! # Hard Reset
//!
//! A tick never waits for a service. On `system.restart` every worker is
//! cancelled and modules are rebuilt at once; the services come back on the
//! first tick after all of them have exited or the shutdown timeout has
//! passed for all of them together.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Instant;

use tokio::time::MissedTickBehavior;

use crate::arbitration::{ArbitrationEngine, Decision, ReportBoard};
use crate::bus::{EventBus, SubscriptionHandle};
use crate::clock::SharedClock;
use crate::config::SentinelConfig;
use crate::context::{AppContext, SharedContext};
use crate::error::SentinelError;
use crate::factory::{ModuleFactories, ServiceFactories};
use crate::modules::{
    FrameDispatch, InputEvent, Mailbox, ModuleError, ModuleRegistry, Transition,
};
use crate::render::TextFrame;
use crate::service::{ServiceError, StopSummary, Supervisor};
use crate::topics;

/// Owner name of the driver's own subscriptions
pub const DRIVER_OWNER: &str = "sentinel.driver";

/// Problems found while bringing the system up; none of them are fatal
#[derive(Debug, Default)]
pub struct StartReport {
    /// Components that could not be built from configuration
    pub build_failures: Vec<SentinelError>,
    /// Modules whose `on_load` failed
    pub load_failures: Vec<ModuleError>,
    /// Services that failed to start
    pub service_failures: Vec<ServiceError>,
    /// Screen shown before the first tick
    pub startup_screen: Option<String>,
}

impl StartReport {
    /// Whether everything came up
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.build_failures.is_empty()
            && self.load_failures.is_empty()
            && self.service_failures.is_empty()
    }
}

/// What one tick did
#[derive(Debug)]
pub struct TickOutcome {
    /// Seconds since the previous tick
    pub dt: f64,
    /// Arbitration result
    pub decision: Decision,
    /// Visibility change applied for it
    pub transition: Transition,
    /// Module events delivered this tick
    pub events_delivered: usize,
    /// Modules whose reports expired this tick
    pub expired: Vec<String>,
    /// Frame dispatch result
    pub dispatch: FrameDispatch,
    /// A hard reset ran at the start of this tick
    pub restarted: bool,
    /// Services were started again after a reset drained
    pub services_resumed: bool,
    /// A quit input was seen; the driver is no longer running
    pub quit: bool,
}

/// The frame driver
pub struct FrameDriver {
    config: SentinelConfig,
    module_factories: ModuleFactories,
    service_factories: ServiceFactories,
    clock: SharedClock,
    bus: EventBus,
    app: SharedContext,
    board: ReportBoard,
    registry: ModuleRegistry,
    engine: ArbitrationEngine,
    supervisor: Supervisor,
    system: Mailbox,
    _system_subscriptions: Vec<SubscriptionHandle>,
    inputs: VecDeque<InputEvent>,
    frame: TextFrame,
    build_failures: Vec<SentinelError>,
    last_tick: Option<Instant>,
    started: bool,
    running: bool,
    services_pending: bool,
    ticks: u64,
}

impl std::fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDriver")
            .field("registry", &self.registry)
            .field("supervisor", &self.supervisor)
            .field("running", &self.running)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl FrameDriver {
    /// Build every component described by `config`
    ///
    /// Components that cannot be built are skipped and reported by
    /// [`FrameDriver::start`].
    #[must_use]
    pub fn new(
        config: SentinelConfig,
        module_factories: ModuleFactories,
        service_factories: ServiceFactories,
        clock: SharedClock,
    ) -> Self {
        let bus = EventBus::new();
        let app = AppContext::shared(config.core.clone(), config.theme.clone());
        let board = ReportBoard::new(clock.clone(), config.priorities.timeout_seconds);
        let registry = ModuleRegistry::new(bus.clone(), app.clone(), board.clone());
        let engine = ArbitrationEngine::new(&config.priorities);
        let supervisor = Supervisor::new(bus.clone(), app.clone());

        let system = Mailbox::default();
        let system_subscriptions = [topics::SYSTEM_RESTART, topics::UI_ALERT]
            .into_iter()
            .map(|topic| {
                let mailbox = system.clone();
                bus.subscribe_as(DRIVER_OWNER, topic, move |event| {
                    mailbox.push(event.clone());
                    Ok(())
                })
            })
            .collect();

        let frame = TextFrame::new(config.core.columns, config.core.rows);
        let mut driver = Self {
            config,
            module_factories,
            service_factories,
            clock,
            bus,
            app,
            board,
            registry,
            engine,
            supervisor,
            system,
            _system_subscriptions: system_subscriptions,
            inputs: VecDeque::new(),
            frame,
            build_failures: Vec::new(),
            last_tick: None,
            started: false,
            running: false,
            services_pending: false,
            ticks: 0,
        };
        let module_failures = driver.build_modules();
        let service_failures = driver.build_services();
        driver.build_failures = module_failures;
        driver.build_failures.extend(service_failures);
        driver
    }

    fn build_modules(&mut self) -> Vec<SentinelError> {
        let mut failures = Vec::new();
        for entry in &self.config.modules {
            if !entry.settings.enabled {
                tracing::debug!(module = %entry.name, "Module disabled");
                continue;
            }
            let result = self
                .module_factories
                .build(&entry.name, &entry.settings)
                .and_then(|module| {
                    self.registry
                        .register(entry.name.clone(), entry.settings.clone(), module)
                        .map_err(SentinelError::from)
                });
            if let Err(e) = result {
                tracing::warn!(module = %entry.name, path = %entry.settings.path, error = %e, "Module skipped");
                failures.push(e);
            }
        }
        self.engine.set_registration_order(self.registry.slugs());
        failures
    }

    fn build_services(&mut self) -> Vec<SentinelError> {
        let mut failures = Vec::new();
        for entry in &self.config.services {
            let result = self
                .service_factories
                .build(&entry.name, &entry.settings)
                .and_then(|service| {
                    self.supervisor
                        .register(entry.name.clone(), entry.settings.clone(), service)
                        .map_err(SentinelError::from)
                });
            if let Err(e) = result {
                tracing::warn!(service = %entry.name, path = %entry.settings.path, error = %e, "Service skipped");
                failures.push(e);
            }
        }
        failures
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Load modules, show the startup screen, start services
    ///
    /// Calling it again while started does nothing.
    pub fn start(&mut self) -> StartReport {
        if self.started {
            return StartReport::default();
        }
        let mut report = self.bring_up();
        report.build_failures = std::mem::take(&mut self.build_failures);
        self.started = true;
        self.running = true;
        tracing::info!(
            modules = self.registry.len(),
            services = self.supervisor.len(),
            startup = report.startup_screen.as_deref().unwrap_or("-"),
            clean = report.is_clean(),
            "Frame driver started"
        );
        report
    }

    fn bring_up(&mut self) -> StartReport {
        let load_failures = self.registry.load_all();
        let startup_screen = self.show_startup_screen();
        let service_failures = self.supervisor.start_all();
        self.last_tick = None;
        StartReport {
            build_failures: Vec::new(),
            load_failures,
            service_failures,
            startup_screen,
        }
    }

    fn show_startup_screen(&mut self) -> Option<String> {
        let configured = self.config.core.startup_screen();
        let screen = match configured {
            Some(slug) if self.registry.is_available(slug) => Some(slug.to_string()),
            Some(slug) => {
                tracing::warn!(screen = %slug, "Startup screen unavailable, using first module");
                self.registry.first_available().map(str::to_string)
            }
            None => self.registry.first_available().map(str::to_string),
        }?;

        match self.registry.activate(&screen) {
            Ok(_) => {
                self.engine.prime_idle(&screen, self.clock.now());
                Some(screen)
            }
            Err(e) => {
                tracing::warn!(screen = %screen, error = %e, "Startup screen could not be shown");
                None
            }
        }
    }

    /// Stop services, then unload modules
    ///
    /// Every service gets the same `shutdown_timeout_secs` deadline.
    pub async fn shutdown(&mut self) -> StopSummary {
        let summary = self
            .supervisor
            .stop_all(self.config.core.shutdown_timeout())
            .await;
        self.services_pending = false;
        let unloaded = self.registry.unload_all();
        self.board.clear_all();
        self.started = false;
        self.running = false;
        tracing::info!(
            stopped = summary.stopped.len(),
            abandoned = summary.abandoned.len(),
            unloaded,
            "Frame driver shut down"
        );
        summary
    }

    /// Tear everything down and bring it back up from configuration
    ///
    /// Runs on the driver's thread when `system.restart` is seen and returns
    /// without waiting for services. Modules are rebuilt and loaded before it
    /// returns; services are only cancelled, and a later [`FrameDriver::tick`]
    /// starts them again, so the report never lists service failures.
    pub fn hard_reset(&mut self) -> StartReport {
        tracing::info!("Hard reset");
        self.supervisor.request_stop_all(self.config.core.shutdown_timeout());
        self.services_pending = true;
        self.registry.clear();
        self.board.clear_all();
        self.engine.reset_idle();
        self.inputs.clear();

        let build_failures = self.build_modules();
        let load_failures = self.registry.load_all();
        let startup_screen = self.show_startup_screen();
        self.last_tick = None;
        self.started = true;
        self.running = true;
        StartReport {
            build_failures,
            load_failures,
            service_failures: Vec::new(),
            startup_screen,
        }
    }

    /// Start services again once a reset has drained; never waits
    fn resume_services(&mut self) -> bool {
        if !self.services_pending {
            return false;
        }
        let Some(summary) = self.supervisor.poll_stop() else {
            return false;
        };
        self.services_pending = false;
        if !summary.abandoned.is_empty() {
            tracing::warn!(abandoned = ?summary.abandoned, "Services abandoned during reset");
        }
        let failures = self.supervisor.start_all();
        for failure in &failures {
            tracing::warn!(error = %failure, label = failure.as_label(), "Service did not come back after reset");
        }
        true
    }

    // ------------------------------------------------------------------------
    // Ticking
    // ------------------------------------------------------------------------

    /// Queue an input event for the next tick
    pub fn push_input(&mut self, input: InputEvent) {
        self.inputs.push_back(input);
    }

    /// Run one frame
    pub fn tick(&mut self) -> TickOutcome {
        let restarted = self.handle_system_events();
        let services_resumed = self.resume_services();

        let now = self.clock.now();
        let dt = self
            .last_tick
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.last_tick = Some(now);
        self.ticks += 1;

        let events_delivered = self.registry.deliver_bus_events();

        let expired = self.board.expire(now);
        let reports = self.board.live(now);
        let registry = &self.registry;
        let decision = self.engine.evaluate(&reports, now, registry.shown(), |slug| {
            registry.is_eligible(slug)
        });
        let transition = self.apply(&decision);

        let inputs: Vec<InputEvent> = self.inputs.drain(..).collect();
        let quit = inputs.contains(&InputEvent::Quit);
        let dispatch = self.registry.dispatch_frame(dt, &inputs, &mut self.frame);

        if quit {
            tracing::info!("Quit requested");
            self.running = false;
        }

        tracing::trace!(
            tick = self.ticks,
            decision = %decision,
            delivered = events_delivered,
            "Tick"
        );

        TickOutcome {
            dt,
            decision,
            transition,
            events_delivered,
            expired,
            dispatch,
            restarted,
            services_resumed,
            quit,
        }
    }

    /// Returns whether a hard reset ran
    fn handle_system_events(&mut self) -> bool {
        let mut restart = false;
        for event in self.system.drain() {
            match event.topic() {
                topics::SYSTEM_RESTART => restart = true,
                topics::UI_ALERT => self.app.apply_alert_payload(event.payload()),
                other => tracing::debug!(topic = %other, "Unexpected system event"),
            }
        }
        if restart {
            let report = self.hard_reset();
            if !report.is_clean() {
                tracing::warn!(
                    build = report.build_failures.len(),
                    load = report.load_failures.len(),
                    services = report.service_failures.len(),
                    "Reset finished with failures"
                );
            }
        }
        restart
    }

    fn apply(&mut self, decision: &Decision) -> Transition {
        let Some(screen) = decision.screen() else {
            // Nothing eligible: keep the shown module if it still may be shown
            let current = self.registry.shown().map(str::to_string);
            return match current {
                Some(slug) if !self.registry.is_eligible(&slug) => {
                    self.registry.deactivate_current();
                    tracing::info!(hidden = %slug, "No eligible screen, display cleared");
                    Transition::Cleared { hidden: slug }
                }
                _ => Transition::Unchanged,
            };
        };

        match self.registry.activate(screen) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(screen = %screen, error = %e, "Decision could not be applied");
                Transition::Unchanged
            }
        }
    }

    /// Tick at the configured rate until `shutdown` resolves or a quit input
    /// arrives, then shut down
    ///
    /// `present` sees the frame after every tick.
    pub async fn run<F, P>(&mut self, shutdown: F, mut present: P) -> StopSummary
    where
        F: Future<Output = ()>,
        P: FnMut(&TextFrame, &TickOutcome),
    {
        if !self.started {
            let report = self.start();
            for failure in &report.build_failures {
                tracing::warn!(error = %failure, "Startup: component skipped");
            }
        }

        let mut interval = tokio::time::interval(self.config.core.frame_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let outcome = self.tick();
                    present(&self.frame, &outcome);
                    if outcome.quit {
                        break;
                    }
                }
            }
        }
        self.shutdown().await
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shared application context
    #[must_use]
    pub fn app(&self) -> &SharedContext {
        &self.app
    }

    /// The report board
    #[must_use]
    pub fn board(&self) -> &ReportBoard {
        &self.board
    }

    /// Module registry
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Service supervisor
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Service supervisor, for restarts
    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Arbitration engine
    #[must_use]
    pub fn engine(&self) -> &ArbitrationEngine {
        &self.engine
    }

    /// The last rendered frame
    #[must_use]
    pub fn frame(&self) -> &TextFrame {
        &self.frame
    }

    /// The configuration the driver was built from
    #[must_use]
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Whether the driver is started and no quit was requested
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ticks run so far
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        self.bus.unsubscribe_owner(DRIVER_OWNER);
    }
}
