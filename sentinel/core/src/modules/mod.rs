//! Screen Modules
//!
//! A module is one independently renderable screen. Modules never decide
//! their own visibility: they report state, and the registry calls their
//! lifecycle hooks when the arbitration decision changes.
//!
//! # Threading
//!
//! Module code only ever runs on the frame driver's thread. Bus handlers
//! installed through [`ModuleContext::subscribe`] run on the publisher's
//! thread, so they do nothing but push the event into the module's
//! [`Mailbox`]; the driver drains mailboxes at the start of every tick and
//! hands the events to [`Module::on_bus_event`].
//!
//! ```text
//!   service threads ──► bus ──► mailbox(camera) ─┐
//!                          └──► mailbox(radar)  ─┼──► frame tick (main thread)
//!                                                 ┘     on_bus_event / update / render
//! ```

mod banner;
mod registry;
mod signal;

pub use banner::BannerModule;
pub use registry::{FrameDispatch, Lifecycle, ModuleRegistry, Transition};
pub use signal::SignalModule;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::arbitration::{ReportOptions, StateReporter};
use crate::bus::{Event, EventBus, Payload, PublishReport, SubscriptionHandle};
use crate::context::SharedContext;
use crate::render::RenderTarget;

/// Events a mailbox holds before the oldest are dropped
pub const MAILBOX_CAPACITY: usize = 256;

// ============================================================================
// Errors
// ============================================================================

/// Module lifecycle hooks, for error reporting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    /// `on_load`
    Load,
    /// `on_unload`
    Unload,
    /// `on_show`
    Show,
    /// `on_hide`
    Hide,
    /// `on_bus_event`
    BusEvent,
    /// `update`
    Update,
    /// `render`
    Render,
    /// `handle_event`
    Input,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "on_load",
            Self::Unload => "on_unload",
            Self::Show => "on_show",
            Self::Hide => "on_hide",
            Self::BusEvent => "on_bus_event",
            Self::Update => "update",
            Self::Render => "render",
            Self::Input => "handle_event",
        };
        f.write_str(name)
    }
}

/// Module errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Raised by a module implementation
    #[error("{0}")]
    Failed(String),

    /// The module's settings table did not fit its schema
    #[error("invalid settings for module '{slug}': {message}")]
    InvalidSettings {
        /// Module slug
        slug: String,
        /// What was wrong
        message: String,
    },

    /// A hook returned an error
    #[error("module '{slug}' failed in {hook}: {message}")]
    Hook {
        /// Module slug
        slug: String,
        /// Hook that failed
        hook: Hook,
        /// Error text
        message: String,
    },

    /// A hook panicked
    #[error("module '{slug}' panicked in {hook}: {message}")]
    Panicked {
        /// Module slug
        slug: String,
        /// Hook that panicked
        hook: Hook,
        /// Panic message
        message: String,
    },

    /// Slug already registered
    #[error("module '{0}' is already registered")]
    Duplicate(String),

    /// Slug not registered
    #[error("unknown module '{0}'")]
    Unknown(String),

    /// Module failed to load and cannot be shown
    #[error("module '{0}' is unavailable")]
    Unavailable(String),
}

impl ModuleError {
    /// Convenience constructor for [`ModuleError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Hook the error came from, if any
    #[must_use]
    pub fn hook(&self) -> Option<Hook> {
        match self {
            Self::Hook { hook, .. } | Self::Panicked { hook, .. } => Some(*hook),
            _ => None,
        }
    }
}

// ============================================================================
// Input
// ============================================================================

/// Input delivered to the shown module after update and render
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press, by name (`"q"`, `"left"`, `"enter"`)
    Key(String),
    /// Pointer press at a frame cell
    Pointer {
        /// Column
        column: usize,
        /// Row
        row: usize,
    },
    /// Request to stop the driver; never delivered to modules
    Quit,
}

// ============================================================================
// Mailbox
// ============================================================================

/// Bounded queue between bus handlers and the frame driver
///
/// Cheap to clone; clones share the queue. When full, the oldest event is
/// dropped.
#[derive(Clone)]
pub struct Mailbox {
    queue: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::with_capacity(MAILBOX_CAPACITY)
    }
}

impl Mailbox {
    /// Mailbox holding at most `capacity` events (minimum 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue an event
    pub fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    /// Take every pending event, oldest first
    #[must_use]
    pub fn drain(&self) -> Vec<Event> {
        self.queue.lock().drain(..).collect()
    }

    /// Pending events
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Events dropped because the mailbox was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Module Context
// ============================================================================

/// Everything a module may touch, handed to every hook
pub struct ModuleContext {
    slug: String,
    settings: toml::Table,
    app: SharedContext,
    bus: EventBus,
    reporter: StateReporter,
    mailbox: Mailbox,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("slug", &self.slug)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

impl ModuleContext {
    /// Create a context for `slug`
    #[must_use]
    pub fn new(
        slug: impl Into<String>,
        settings: toml::Table,
        app: SharedContext,
        bus: EventBus,
        reporter: StateReporter,
    ) -> Self {
        Self {
            slug: slug.into(),
            settings,
            app,
            bus,
            reporter,
            mailbox: Mailbox::default(),
        }
    }

    /// Module slug
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// The module's `settings` table
    #[must_use]
    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    /// Shared application context
    #[must_use]
    pub fn app(&self) -> &SharedContext {
        &self.app
    }

    /// The event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The module's mailbox
    #[must_use]
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Reporting handle for this module
    #[must_use]
    pub fn reporter(&self) -> StateReporter {
        self.reporter.clone()
    }

    /// Publish on behalf of this module
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Payload>) -> PublishReport {
        self.bus.publish(topic, payload)
    }

    /// Route `topic` into this module's mailbox
    ///
    /// The events arrive through [`Module::on_bus_event`] on the next tick.
    /// The subscription is owned by the module and removed when it unloads.
    pub fn subscribe(&self, topic: impl Into<String>) -> SubscriptionHandle {
        let mailbox = self.mailbox.clone();
        self.bus.subscribe_as(self.slug.clone(), topic, move |event| {
            mailbox.push(event.clone());
            Ok(())
        })
    }

    /// Remove a subscription made through [`ModuleContext::subscribe`]
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    /// Claim (or with `None`, release) screen time
    pub fn report_state(&self, label: Option<&str>, options: ReportOptions) {
        self.reporter.report(label, options);
    }

    /// Release any claim
    pub fn clear_state(&self) {
        self.reporter.clear();
    }
}

// ============================================================================
// Module Trait
// ============================================================================

/// A screen
///
/// Every hook except [`Module::render`] has a no-op default. Hooks must not
/// block: they share one thread with every other module and the arbitration
/// cycle. Errors and panics are caught by the registry; the module loses its
/// claim on the screen until it reports again.
pub trait Module {
    /// Called once after registration
    ///
    /// # Errors
    ///
    /// A failure makes the module unavailable for the rest of the run.
    fn on_load(&mut self, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Called once at shutdown or reset
    ///
    /// # Errors
    ///
    /// Failures are logged; unloading continues.
    fn on_unload(&mut self, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// The module became the shown screen
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn on_show(&mut self, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// The module stopped being the shown screen
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn on_hide(&mut self, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// An event from a subscribed topic, delivered whether shown or hidden
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn on_bus_event(&mut self, _event: &Event, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Advance by `dt` seconds (shown module only)
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn update(&mut self, _dt: f64, _ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Draw into `target` (shown module only)
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn render(&mut self, target: &mut dyn RenderTarget, ctx: &ModuleContext) -> Result<(), ModuleError>;

    /// Handle input; return `true` if consumed (shown module only)
    ///
    /// # Errors
    ///
    /// A failure faults the module.
    fn handle_event(
        &mut self,
        _input: &InputEvent,
        _ctx: &mut ModuleContext,
    ) -> Result<bool, ModuleError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::ReportBoard;
    use crate::clock::SystemClock;
    use crate::config::CoreSettings;
    use crate::context::{AppContext, ThemeColors};

    fn context(bus: &EventBus, board: &ReportBoard) -> ModuleContext {
        ModuleContext::new(
            "camera",
            toml::Table::new(),
            AppContext::shared(CoreSettings::default(), ThemeColors::default()),
            bus.clone(),
            board.reporter("camera"),
        )
    }

    #[test]
    fn test_mailbox_drops_oldest_when_full() {
        let mailbox = Mailbox::with_capacity(2);
        for topic in ["a", "b", "c"] {
            mailbox.push(Event::new(topic, ()));
        }
        assert_eq!(mailbox.dropped(), 1);
        let topics: Vec<_> = mailbox.drain().iter().map(|e| e.topic().to_string()).collect();
        assert_eq!(topics, vec!["b", "c"]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_subscribe_only_enqueues() {
        let bus = EventBus::new();
        let board = ReportBoard::new(SystemClock::shared(), 0.0);
        let ctx = context(&bus, &board);

        let handle = ctx.subscribe("services.mqtt.detection");
        assert_eq!(handle.owner(), "camera");

        let report = bus.publish("services.mqtt.detection", serde_json::json!({"state": "danger"}));
        assert_eq!(report.delivered, 1);
        assert_eq!(ctx.mailbox().len(), 1);

        assert!(ctx.unsubscribe(&handle));
        bus.publish("services.mqtt.detection", ());
        assert_eq!(ctx.mailbox().len(), 1);
    }

    #[test]
    fn test_report_state_goes_to_board() {
        let bus = EventBus::new();
        let board = ReportBoard::new(SystemClock::shared(), 0.0);
        let ctx = context(&bus, &board);

        ctx.report_state(Some("danger"), ReportOptions::new().weight(3));
        assert_eq!(board.get("camera").and_then(|r| r.weight), Some(3));
        ctx.clear_state();
        assert!(board.get("camera").is_none());
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::BusEvent.to_string(), "on_bus_event");
        let err = ModuleError::Hook {
            slug: "radar".into(),
            hook: Hook::Render,
            message: "no tiles".into(),
        };
        assert_eq!(err.to_string(), "module 'radar' failed in render: no tiles");
        assert_eq!(err.hook(), Some(Hook::Render));
    }
}
