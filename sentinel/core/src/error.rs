//! Crate-level error type
//!
//! Each component has its own error enum; [`SentinelError`] wraps them for
//! the few entry points that can fail as a whole (building the frame driver,
//! loading configuration).

use std::any::Any;

use thiserror::Error;

use crate::config::ConfigError;
use crate::modules::ModuleError;
use crate::service::ServiceError;

/// Top-level error
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Configuration could not be read or parsed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A module operation failed
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// A service operation failed
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Extract a printable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
