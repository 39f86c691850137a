//! Sentinel Core - Event-Driven Display Orchestration
//!
//! This crate decides, frame by frame, which of several independent screens
//! (modules) is visible. Background services publish events; modules turn
//! them into weighted state reports; the arbitration engine resolves the
//! reports into one active screen, falling back to an idle rotation when
//! nothing claims the display.
//!
//! The core renders nothing itself and owns no sockets. Modules draw into a
//! [`render::RenderTarget`]; services do their own I/O on their own threads.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Services (own threads)                       │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐                     │
//! │   │   MQTT   │   │  Video   │   │  Script  │  ...                │
//! │   └────┬─────┘   └────┬─────┘   └────┬─────┘                     │
//! │        └──────────────┴──────────────┘                           │
//! │                       │ publish                                  │
//! └───────────────────────┼──────────────────────────────────────────┘
//!                         ▼
//!                  ┌─────────────┐
//!                  │  Event Bus  │  snapshot dispatch, handler isolation
//!                  └──────┬──────┘
//!                         │ enqueue
//! ┌───────────────────────┼──────────────────────────────────────────┐
//! │                FRAME DRIVER (one thread)                         │
//! │                       ▼                                          │
//! │   ┌──────────────┐  reports  ┌─────────────┐  decision           │
//! │   │   Module     │──────────►│ Arbitration │─────────┐           │
//! │   │   Registry   │◄──────────│   Engine    │         │           │
//! │   └──────┬───────┘  activate └─────────────┘         │           │
//! │          │ update / render / input                   │           │
//! │          ▼                                           │           │
//! │   ┌──────────────┐                                   │           │
//! │   │ RenderTarget │◄──────────────────────────────────┘           │
//! │   └──────────────┘                                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`FrameDriver`]: owns every component and runs the tick loop
//! - [`EventBus`]: in-process publish/subscribe router
//! - [`Supervisor`]: background service lifecycles
//! - [`ModuleRegistry`]: module lifecycles and frame dispatch
//! - [`ArbitrationEngine`]: resolves state reports into one screen
//! - [`SentinelConfig`]: the parsed configuration
//!
//! # Quick Start
//!
//! ```no_run
//! use sentinel_core::{
//!     clock::SystemClock,
//!     config::load_config,
//!     factory::{ModuleFactories, ServiceFactories},
//!     FrameDriver,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let loaded = load_config(None)?;
//! let mut driver = FrameDriver::new(
//!     loaded.config,
//!     ModuleFactories::with_builtins(),
//!     ServiceFactories::with_builtins(),
//!     SystemClock::shared(),
//! );
//! driver
//!     .run(async { let _ = tokio::signal::ctrl_c().await; }, |frame, _| {
//!         println!("{frame}");
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]

pub mod arbitration;
pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod factory;
pub mod modules;
pub mod render;
pub mod service;
pub mod topics;

// Re-exports for convenience
pub use arbitration::{ArbitrationEngine, Decision, ReportBoard, ReportOptions, StateReport};
pub use bus::{Event, EventBus, HandlerError, Payload, PublishReport, SubscriptionHandle};
pub use config::{load_config, ConfigError, SentinelConfig};
pub use context::{AlertLevel, AppContext, SharedContext};
pub use driver::{FrameDriver, StartReport, TickOutcome};
pub use error::SentinelError;
pub use factory::{ModuleFactories, ServiceFactories};
pub use modules::{InputEvent, Module, ModuleContext, ModuleError, ModuleRegistry};
pub use render::{RenderTarget, TextFrame};
pub use service::{Service, ServiceContext, ServiceError, ServiceState, Supervisor};
