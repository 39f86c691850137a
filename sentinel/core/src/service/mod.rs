//! Background Services
//!
//! A service is a producer: it runs off the frame thread and publishes onto
//! the event bus. The core does not know what a service does; it only
//! starts it, asks it to stop, and tracks its state.
//!
//! # Service Contract
//!
//! - [`Service::start`] runs on the supervisor's thread. Return an error to
//!   refuse to start; the record is marked `crashed`.
//! - [`Service::run`] is blocking code. It runs on the blocking pool of the
//!   supervisor's Tokio runtime until it returns or until its
//!   [`CancellationToken`] is cancelled. Workers pace themselves with
//!   [`ServiceContext::wait_cancelled`] so they wake up immediately on stop.
//! - [`Service::stop`] is called on the supervisor's thread after the token
//!   is cancelled, to unblock I/O the worker may be stuck in.
//!
//! Topics should follow `services.<name>.<kind>`;
//! [`ServiceContext::publish_kind`] builds them.

mod script;
mod supervisor;

pub use script::ScriptService;
pub use supervisor::{ServiceStatus, StopOutcome, StopSummary, Supervisor};

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Payload, PublishReport};
use crate::context::SharedContext;
use crate::topics;

// ============================================================================
// Errors
// ============================================================================

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Raised by a service implementation
    #[error("{0}")]
    Failed(String),

    /// The settings table did not fit the service's schema
    #[error("invalid settings for service '{name}': {message}")]
    InvalidSettings {
        /// Service name
        name: String,
        /// What was wrong
        message: String,
    },

    /// `start` failed; the service is crashed
    #[error("service '{name}' failed to start: {message}")]
    StartFailed {
        /// Service name
        name: String,
        /// Error text
        message: String,
    },

    /// The service runtime could not be built
    #[error("service '{name}' worker could not be spawned: {source}")]
    Spawn {
        /// Service name
        name: String,
        /// OS error
        source: std::io::Error,
    },

    /// Name already registered
    #[error("service '{0}' is already registered")]
    Duplicate(String),

    /// Name not registered
    #[error("unknown service '{0}'")]
    Unknown(String),

    /// Start requested while starting or running
    #[error("service '{0}' is already running")]
    AlreadyRunning(String),
}

impl ServiceError {
    /// Convenience constructor for [`ServiceError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Short stable label for logs
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Failed(_) => "service_failed",
            Self::InvalidSettings { .. } => "service_invalid_settings",
            Self::StartFailed { .. } => "service_start_failed",
            Self::Spawn { .. } => "service_spawn_failed",
            Self::Duplicate(_) => "service_duplicate",
            Self::Unknown(_) => "service_unknown",
            Self::AlreadyRunning(_) => "service_already_running",
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a service record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Not running
    Stopped,
    /// `start` in progress
    Starting,
    /// Worker alive
    Running,
    /// Shutdown requested, waiting for the worker
    Stopping,
    /// `start` failed, or the worker returned an error or panicked
    Crashed,
}

impl ServiceState {
    /// Whether a worker may be alive
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

// ============================================================================
// Service Context
// ============================================================================

/// Handles given to a service for one run
#[derive(Clone, Debug)]
pub struct ServiceContext {
    name: String,
    settings: toml::Table,
    bus: EventBus,
    app: SharedContext,
    cancel: CancellationToken,
    runtime: Handle,
}

impl ServiceContext {
    /// Create a context
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        settings: toml::Table,
        bus: EventBus,
        app: SharedContext,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            bus,
            app,
            cancel,
            runtime,
        }
    }

    /// Service name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service's `settings` table
    #[must_use]
    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    /// Deserialize the settings into `T`
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidSettings`] if they do not fit.
    pub fn typed_settings<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        toml::Value::Table(self.settings.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ServiceError::InvalidSettings {
                name: self.name.clone(),
                message: e.to_string(),
            })
    }

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

    /// Cancelled when the supervisor stops this run
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Block for up to `timeout` or until a stop is requested
    ///
    /// Returns `true` if the run was cancelled (possibly before the call),
    /// `false` if the timeout elapsed first. Must be called from blocking
    /// code such as [`Service::run`], never from inside an async task.
    #[must_use]
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        if self.cancel.is_cancelled() || timeout.is_zero() {
            return self.cancel.is_cancelled();
        }
        self.runtime.block_on(async {
            tokio::time::timeout(timeout, self.cancel.cancelled())
                .await
                .is_ok()
        })
    }

    /// Handle of the runtime the worker runs on, for async I/O
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Publish on an arbitrary topic
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Payload>) -> PublishReport {
        self.bus.publish(topic, payload)
    }

    /// Publish on `services.<name>.<kind>`
    pub fn publish_kind(&self, kind: &str, payload: impl Into<Payload>) -> PublishReport {
        self.bus.publish(topics::service_topic(&self.name, kind), payload)
    }
}

// ============================================================================
// Service Trait
// ============================================================================

/// A background producer
pub trait Service: Send + Sync + 'static {
    /// Prepare to run; called on the supervisor's thread
    ///
    /// # Errors
    ///
    /// An error marks the service crashed; nothing is spawned.
    fn start(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Worker body; returns when done or when `ctx.cancellation()` fires
    ///
    /// # Errors
    ///
    /// An error marks the service crashed.
    fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError>;

    /// Unblock the worker after shutdown was triggered
    fn stop(&self) {}
}
