//! Module Registry - Lifecycle and Exclusive Visibility
//!
//! Owns every module instance and its context, in registration order.
//!
//! # Lifecycle
//!
//! ```text
//!   unloaded ──load──► loaded ──activate──► shown ◄──► hidden
//!       ▲                                     │           │
//!       └──────────────── unload_all ─────────┴───────────┘
//! ```
//!
//! At most one module is `shown`. `activate` hides the previous module
//! before showing the next, and each hook fires once per transition even
//! when it fails. A failing hook is caught here: the module's report is
//! cleared and it is marked faulted on the report board. A failing
//! `on_load` makes the module unavailable for the rest of the run.

use std::panic::{self, AssertUnwindSafe};

use crate::arbitration::ReportBoard;
use crate::bus::EventBus;
use crate::config::ComponentSettings;
use crate::context::SharedContext;
use crate::error::panic_message;
use crate::render::RenderTarget;

use super::{Hook, InputEvent, Module, ModuleContext, ModuleError};

/// Visibility state of a module
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Registered, `on_load` not (successfully) run
    Unloaded,
    /// Loaded, never shown
    Loaded,
    /// Loaded, shown before, not shown now
    Hidden,
    /// The visible module
    Shown,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Hidden => write!(f, "hidden"),
            Self::Shown => write!(f, "shown"),
        }
    }
}

/// Result of an `activate` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The module was already shown
    Unchanged,
    /// Visibility moved
    Switched {
        /// Module hidden first, if any
        hidden: Option<String>,
        /// Module shown
        shown: String,
    },
    /// The shown module was hidden and nothing replaced it
    Cleared {
        /// Module hidden
        hidden: String,
    },
}

/// What happened during one frame dispatch
#[derive(Debug, Default)]
pub struct FrameDispatch {
    /// Module that received the frame
    pub module: Option<String>,
    /// Inputs the module consumed
    pub consumed_inputs: usize,
    /// Hook failure that cut the frame short
    pub failure: Option<ModuleError>,
}

struct ModuleRecord {
    slug: String,
    settings: ComponentSettings,
    lifecycle: Lifecycle,
    available: bool,
    module: Box<dyn Module>,
    ctx: ModuleContext,
}

/// Registry of screen modules
pub struct ModuleRegistry {
    records: Vec<ModuleRecord>,
    shown: Option<usize>,
    bus: EventBus,
    app: SharedContext,
    board: ReportBoard,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.slugs())
            .field("shown", &self.shown())
            .finish_non_exhaustive()
    }
}

/// Run one module hook, converting errors and panics
fn guarded<T>(
    slug: &str,
    hook: Hook,
    f: impl FnOnce() -> Result<T, ModuleError>,
) -> Result<T, ModuleError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ModuleError::Hook {
            slug: slug.to_string(),
            hook,
            message: e.to_string(),
        }),
        Err(payload) => Err(ModuleError::Panicked {
            slug: slug.to_string(),
            hook,
            message: panic_message(payload.as_ref()),
        }),
    }
}

impl ModuleRegistry {
    /// Empty registry
    #[must_use]
    pub fn new(bus: EventBus, app: SharedContext, board: ReportBoard) -> Self {
        Self {
            records: Vec::new(),
            shown: None,
            bus,
            app,
            board,
        }
    }

    /// Add a module in `unloaded` state
    ///
    /// Returns `Ok(false)` without registering if `settings.enabled` is false.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Duplicate`] if the slug is taken.
    pub fn register(
        &mut self,
        slug: impl Into<String>,
        settings: ComponentSettings,
        module: Box<dyn Module>,
    ) -> Result<bool, ModuleError> {
        let slug = slug.into();
        if !settings.enabled {
            tracing::debug!(module = %slug, "Module disabled, not registered");
            return Ok(false);
        }
        if self.index(&slug).is_some() {
            return Err(ModuleError::Duplicate(slug));
        }

        let ctx = ModuleContext::new(
            slug.clone(),
            settings.settings.clone(),
            self.app.clone(),
            self.bus.clone(),
            self.board.reporter(slug.clone()),
        );
        tracing::debug!(module = %slug, path = %settings.path, "Module registered");
        self.records.push(ModuleRecord {
            slug,
            settings,
            lifecycle: Lifecycle::Unloaded,
            available: true,
            module,
            ctx,
        });
        Ok(true)
    }

    /// Run `on_load` for one module
    ///
    /// Loading an already loaded module does nothing.
    ///
    /// # Errors
    ///
    /// Returns the hook failure; the module is then unavailable.
    pub fn load(&mut self, slug: &str) -> Result<(), ModuleError> {
        let index = self.require(slug)?;
        let record = &mut self.records[index];
        if record.lifecycle != Lifecycle::Unloaded {
            return Ok(());
        }
        if !record.available {
            return Err(ModuleError::Unavailable(record.slug.clone()));
        }

        let result = guarded(&record.slug, Hook::Load, || record.module.on_load(&mut record.ctx));
        match result {
            Ok(()) => {
                record.lifecycle = Lifecycle::Loaded;
                tracing::info!(module = %record.slug, "Module loaded");
                Ok(())
            }
            Err(e) => {
                record.available = false;
                self.bus.unsubscribe_owner(&record.slug);
                self.board.clear(&record.slug);
                let _ = record.ctx.mailbox().drain();
                tracing::error!(module = %record.slug, error = %e, "Module failed to load, unavailable");
                Err(e)
            }
        }
    }

    /// Load every module in registration order
    ///
    /// Returns the failures; they are not fatal.
    pub fn load_all(&mut self) -> Vec<ModuleError> {
        let slugs = self.slugs();
        slugs
            .iter()
            .filter_map(|slug| self.load(slug).err())
            .collect()
    }

    /// Make `slug` the shown module, hiding the current one first
    ///
    /// # Errors
    ///
    /// Fails if the slug is unknown or the module is not loaded. Hook
    /// failures do not fail the call; they fault the module.
    pub fn activate(&mut self, slug: &str) -> Result<Transition, ModuleError> {
        let index = self.require(slug)?;
        let target = &self.records[index];
        if !target.available || target.lifecycle == Lifecycle::Unloaded {
            return Err(ModuleError::Unavailable(target.slug.clone()));
        }
        if self.shown == Some(index) {
            return Ok(Transition::Unchanged);
        }

        let hidden = self.hide_current();

        let board = &self.board;
        let record = &mut self.records[index];
        if let Err(e) = guarded(&record.slug, Hook::Show, || record.module.on_show(&mut record.ctx)) {
            tracing::warn!(module = %record.slug, error = %e, "Show hook failed");
            board.mark_faulted(&record.slug);
        }
        record.lifecycle = Lifecycle::Shown;
        self.shown = Some(index);

        tracing::info!(
            shown = %record.slug,
            hidden = hidden.as_deref().unwrap_or("-"),
            "Screen changed"
        );
        Ok(Transition::Switched {
            hidden,
            shown: record.slug.clone(),
        })
    }

    /// Hide `slug` if it is the shown module
    ///
    /// Returns whether anything was hidden.
    ///
    /// # Errors
    ///
    /// Fails if the slug is unknown.
    pub fn deactivate(&mut self, slug: &str) -> Result<bool, ModuleError> {
        let index = self.require(slug)?;
        if self.shown != Some(index) {
            return Ok(false);
        }
        Ok(self.hide_current().is_some())
    }

    /// Hide whatever is shown; returns its slug
    pub fn deactivate_current(&mut self) -> Option<String> {
        self.hide_current()
    }

    fn hide_current(&mut self) -> Option<String> {
        let index = self.shown.take()?;
        let board = &self.board;
        let record = &mut self.records[index];
        if let Err(e) = guarded(&record.slug, Hook::Hide, || record.module.on_hide(&mut record.ctx)) {
            tracing::warn!(module = %record.slug, error = %e, "Hide hook failed");
            board.mark_faulted(&record.slug);
        }
        record.lifecycle = Lifecycle::Hidden;
        Some(record.slug.clone())
    }

    /// Drain every mailbox and deliver the events on this thread
    ///
    /// Loaded modules receive their events whether shown or hidden. Events
    /// queued for unavailable modules are discarded. Returns the number of
    /// events delivered.
    pub fn deliver_bus_events(&mut self) -> usize {
        let board = &self.board;
        let mut delivered = 0;
        for record in &mut self.records {
            let events = record.ctx.mailbox().drain();
            if events.is_empty() {
                continue;
            }
            if record.lifecycle == Lifecycle::Unloaded {
                tracing::trace!(module = %record.slug, dropped = events.len(), "Events for unloaded module discarded");
                continue;
            }
            for event in &events {
                let result = guarded(&record.slug, Hook::BusEvent, || {
                    record.module.on_bus_event(event, &mut record.ctx)
                });
                match result {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(module = %record.slug, topic = %event.topic(), error = %e, "Event hook failed");
                        board.mark_faulted(&record.slug);
                    }
                }
            }
        }
        delivered
    }

    /// Run update, render, then input for the shown module
    ///
    /// The frame stops at the first failing hook; the module is faulted.
    pub fn dispatch_frame(
        &mut self,
        dt: f64,
        inputs: &[InputEvent],
        target: &mut dyn RenderTarget,
    ) -> FrameDispatch {
        let Some(index) = self.shown else {
            return FrameDispatch::default();
        };
        let color = self.app.current_color();
        let record = &mut self.records[index];
        let mut dispatch = FrameDispatch {
            module: Some(record.slug.clone()),
            ..FrameDispatch::default()
        };

        let result = guarded(&record.slug, Hook::Update, || record.module.update(dt, &mut record.ctx))
            .and_then(|()| {
                target.clear();
                target.set_color(color);
                guarded(&record.slug, Hook::Render, || record.module.render(target, &record.ctx))
            })
            .and_then(|()| {
                for input in inputs.iter().filter(|i| **i != InputEvent::Quit) {
                    let consumed = guarded(&record.slug, Hook::Input, || {
                        record.module.handle_event(input, &mut record.ctx)
                    })?;
                    if consumed {
                        dispatch.consumed_inputs += 1;
                    }
                }
                Ok(())
            });

        if let Err(e) = result {
            tracing::warn!(module = %record.slug, hook = ?e.hook(), error = %e, "Frame hook failed");
            self.board.mark_faulted(&record.slug);
            dispatch.failure = Some(e);
        }
        dispatch
    }

    /// Hide, unload and unsubscribe every module
    ///
    /// Returns the number of modules that were loaded.
    pub fn unload_all(&mut self) -> usize {
        self.hide_current();
        let mut unloaded = 0;
        for record in &mut self.records {
            if record.lifecycle != Lifecycle::Unloaded {
                if let Err(e) = guarded(&record.slug, Hook::Unload, || {
                    record.module.on_unload(&mut record.ctx)
                }) {
                    tracing::warn!(module = %record.slug, error = %e, "Unload hook failed");
                }
                record.lifecycle = Lifecycle::Unloaded;
                unloaded += 1;
            }
            self.bus.unsubscribe_owner(&record.slug);
            self.board.clear(&record.slug);
            let _ = record.ctx.mailbox().drain();
        }
        tracing::info!(unloaded, "Modules unloaded");
        unloaded
    }

    /// Unload everything and forget every module
    pub fn clear(&mut self) {
        self.unload_all();
        self.records.clear();
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Lifecycle of `slug`
    #[must_use]
    pub fn lifecycle(&self, slug: &str) -> Option<Lifecycle> {
        self.index(slug).map(|i| self.records[i].lifecycle)
    }

    /// The shown module
    #[must_use]
    pub fn shown(&self) -> Option<&str> {
        self.shown.map(|i| self.records[i].slug.as_str())
    }

    /// Whether `slug` loaded successfully and has not been unloaded
    #[must_use]
    pub fn is_available(&self, slug: &str) -> bool {
        self.index(slug).is_some_and(|i| {
            let record = &self.records[i];
            record.available && record.lifecycle != Lifecycle::Unloaded
        })
    }

    /// Whether `slug` may win arbitration: available and not faulted
    #[must_use]
    pub fn is_eligible(&self, slug: &str) -> bool {
        self.is_available(slug) && !self.board.is_faulted(slug)
    }

    /// Slugs in registration order
    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        self.records.iter().map(|r| r.slug.clone()).collect()
    }

    /// First available module in registration order
    #[must_use]
    pub fn first_available(&self) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.available && r.lifecycle != Lifecycle::Unloaded)
            .map(|r| r.slug.as_str())
    }

    /// Configuration of `slug`
    #[must_use]
    pub fn settings(&self, slug: &str) -> Option<&ComponentSettings> {
        self.index(slug).map(|i| &self.records[i].settings)
    }

    /// Number of registered modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no module is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The report board modules report into
    #[must_use]
    pub fn board(&self) -> &ReportBoard {
        &self.board
    }

    fn index(&self, slug: &str) -> Option<usize> {
        self.records.iter().position(|r| r.slug == slug)
    }

    fn require(&self, slug: &str) -> Result<usize, ModuleError> {
        self.index(slug)
            .ok_or_else(|| ModuleError::Unknown(slug.to_string()))
    }
}
