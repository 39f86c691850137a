//! Shared Application Context
//!
//! One [`AppContext`] is created at startup and handed by reference (`Arc`)
//! to every module and service. It replaces ad-hoc global state: core
//! settings and theme colours are read-only, and the alert state is the only
//! mutable part, guarded by a lock.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bus::Payload;
use crate::config::CoreSettings;

/// Header title shown when no alert is active
pub const DEFAULT_HEADER_TITLE: &str = "S.E.N.T.I.N.E.L. v1.0";

/// RGB colour, serialised as `[r, g, b]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// `[theme]` colours
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeColors {
    /// Normal operation
    pub default: Rgb,
    /// Warning alert
    pub warning: Rgb,
    /// Danger alert
    pub danger: Rgb,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            default: Rgb(0, 255, 65),
            warning: Rgb(255, 165, 0),
            danger: Rgb(255, 0, 0),
        }
    }
}

impl ThemeColors {
    /// Colour for an alert level
    #[must_use]
    pub fn for_level(&self, level: AlertLevel) -> Rgb {
        match level {
            AlertLevel::None => self.default,
            AlertLevel::Warning => self.warning,
            AlertLevel::Danger => self.danger,
        }
    }
}

/// Global alert level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Nothing to report
    #[default]
    None,
    /// Something needs attention
    Warning,
    /// Something needs attention now
    Danger,
}

impl AlertLevel {
    /// Parse a level; unknown strings mean [`AlertLevel::None`]
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "warning" | "warn" => Self::Warning,
            "danger" | "alert" | "critical" => Self::Danger,
            _ => Self::None,
        }
    }

    /// Default header title for this level
    #[must_use]
    pub fn default_title(&self) -> &'static str {
        match self {
            Self::None => DEFAULT_HEADER_TITLE,
            Self::Warning => "WARNING",
            Self::Danger => "DANGER",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Warning => write!(f, "warning"),
            Self::Danger => write!(f, "danger"),
        }
    }
}

/// Current alert level, header title and theme colour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertState {
    /// Level
    pub level: AlertLevel,
    /// Header title
    pub title: String,
    /// Theme colour for the level
    pub color: Rgb,
}

/// Read-mostly context shared by modules and services
#[derive(Debug)]
pub struct AppContext {
    core: CoreSettings,
    theme: ThemeColors,
    alert: RwLock<AlertState>,
}

/// Shared handle to the application context
pub type SharedContext = Arc<AppContext>;

impl AppContext {
    /// Create a context with no active alert
    #[must_use]
    pub fn new(core: CoreSettings, theme: ThemeColors) -> Self {
        let alert = AlertState {
            level: AlertLevel::None,
            title: DEFAULT_HEADER_TITLE.to_string(),
            color: theme.default,
        };
        Self {
            core,
            theme,
            alert: RwLock::new(alert),
        }
    }

    /// Create a shared context
    #[must_use]
    pub fn shared(core: CoreSettings, theme: ThemeColors) -> SharedContext {
        Arc::new(Self::new(core, theme))
    }

    /// Core settings
    #[must_use]
    pub fn core(&self) -> &CoreSettings {
        &self.core
    }

    /// Theme colours
    #[must_use]
    pub fn theme(&self) -> &ThemeColors {
        &self.theme
    }

    /// Snapshot of the alert state
    #[must_use]
    pub fn alert(&self) -> AlertState {
        self.alert.read().clone()
    }

    /// Colour modules should draw with right now
    #[must_use]
    pub fn current_color(&self) -> Rgb {
        self.alert.read().color
    }

    /// Set the alert level, with an optional custom header title
    pub fn set_alert(&self, level: AlertLevel, title: Option<String>) {
        let state = AlertState {
            level,
            title: title.unwrap_or_else(|| level.default_title().to_string()),
            color: self.theme.for_level(level),
        };
        tracing::info!(level = %state.level, title = %state.title, "Alert level changed");
        *self.alert.write() = state;
    }

    /// Apply a `ui.alert` payload
    ///
    /// Accepts `{"level": "...", "title": "..."}` or a bare level string, as
    /// JSON or as a plain `String`. Anything else resets to no alert.
    pub fn apply_alert_payload(&self, payload: &Payload) {
        let (level, title) = if let Some(value) = payload.json() {
            match value {
                serde_json::Value::String(level) => (AlertLevel::parse(level), None),
                serde_json::Value::Object(map) => (
                    map.get("level")
                        .and_then(serde_json::Value::as_str)
                        .map_or(AlertLevel::None, AlertLevel::parse),
                    map.get("title")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string),
                ),
                _ => (AlertLevel::None, None),
            }
        } else if let Some(level) = payload.downcast_ref::<String>() {
            (AlertLevel::parse(level), None)
        } else if let Some(level) = payload.downcast_ref::<&'static str>() {
            (AlertLevel::parse(level), None)
        } else {
            (AlertLevel::None, None)
        };
        self.set_alert(level, title);
    }
}
