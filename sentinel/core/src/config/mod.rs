//! TOML Configuration File Support
//!
//! Loads the sentinel configuration: core settings, theme colours, the
//! priority rules that drive arbitration, and the per-module / per-service
//! component tables.
//!
//! # Configuration Priority
//!
//! The file is located with the following priority (highest first):
//! 1. CLI argument (`--config`)
//! 2. `SENTINEL_CONFIG` environment variable
//! 3. `$XDG_CONFIG_HOME/sentinel/sentinel.toml`
//! 4. Built-in defaults (no file)
//!
//! # Partial Parsing
//!
//! Only an unreadable file or a document that is not valid TOML is fatal.
//! Every `[modules.*]`, `[services.*]` and `[[priorities.rules]]` entry is
//! deserialised on its own; an entry that does not fit the schema is skipped
//! and recorded as a [`ConfigDiagnostic`] so the system still starts with
//! whatever parsed.
//!
//! # Example Configuration
//!
//! ```toml
//! [core]
//! fps = 30
//! startup_screen = "camera"
//!
//! [priorities]
//! timeout_seconds = 0
//! [priorities.idle]
//! cycle = ["camera", "clock"]
//! dwell_seconds = 20
//! [[priorities.rules]]
//! when = { module = "camera", state = ["danger", "warning"] }
//! weight = 100
//! screen = "camera"
//!
//! [modules.camera]
//! path = "signal"
//! [modules.camera.settings]
//! topics = ["services.mqtt.detection"]
//! ```

mod priorities;

pub use priorities::{IdleConfig, PriorityConfig, RuleConfig, StateMatch, WhenConfig};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ThemeColors;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SENTINEL_CONFIG";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize configuration
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A component names an implementation that is not in the factory table
    #[error("{section}: unknown implementation '{path}'")]
    UnknownImplementation {
        /// Config section, e.g. `modules.camera`
        section: String,
        /// The unresolved `path` key
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Non-fatal problem found while loading; the offending entry was skipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDiagnostic {
    /// Config section the problem was found in
    pub section: String,
    /// What went wrong
    pub message: String,
}

impl ConfigDiagnostic {
    /// Create a diagnostic
    pub fn new(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.section, self.message)
    }
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Path given on the command line
    Cli,
    /// Path from `SENTINEL_CONFIG`
    Env,
    /// The XDG default file
    File,
    /// Built-in defaults
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Configuration Structures
// =============================================================================

/// `[core]` section
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreSettings {
    /// Frame driver tick rate
    pub fps: u32,
    /// Screen shown before the first arbitration, or `"auto"`
    pub startup_screen: String,
    /// Per-service bound on cooperative shutdown
    pub shutdown_timeout_secs: f64,
    /// Text frame width in columns
    pub columns: usize,
    /// Text frame height in rows
    pub rows: usize,
    /// Any other core keys, kept for modules that want them
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            startup_screen: "auto".to_string(),
            shutdown_timeout_secs: 2.0,
            columns: 64,
            rows: 16,
            extra: toml::Table::new(),
        }
    }
}

impl CoreSettings {
    /// The configured startup screen, `None` for `"auto"` or empty
    #[must_use]
    pub fn startup_screen(&self) -> Option<&str> {
        let screen = self.startup_screen.trim();
        if screen.is_empty() || screen.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(screen)
        }
    }

    /// Frame period derived from `fps` (clamped to 1..=240)
    #[must_use]
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.fps.clamp(1, 240)))
    }

    /// Shutdown wait as a duration (negative values clamp to zero)
    #[must_use]
    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.shutdown_timeout_secs)
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// One `[modules.<slug>]` or `[services.<name>]` entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComponentSettings {
    /// Whether the component is instantiated at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Key into the module or service factory table
    #[serde(alias = "module", alias = "service")]
    pub path: String,
    /// Implementation-specific settings, opaque to the core
    #[serde(default, alias = "config")]
    pub settings: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl ComponentSettings {
    /// Enabled component with empty settings
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
            settings: toml::Table::new(),
        }
    }

    /// Replace the settings table
    #[must_use]
    pub fn with_settings(mut self, settings: toml::Table) -> Self {
        self.settings = settings;
        self
    }

    /// Mark the component disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Deserialize the settings table into a typed struct
    ///
    /// # Errors
    ///
    /// Returns the deserialization error if the table does not match `T`.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, toml::de::Error> {
        toml::Value::Table(self.settings.clone()).try_into()
    }
}

/// A named component, in declaration order
#[derive(Clone, Debug, PartialEq)]
pub struct NamedComponent {
    /// Module slug or service name
    pub name: String,
    /// Its settings
    pub settings: ComponentSettings,
}

/// The complete configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SentinelConfig {
    /// `[core]`
    pub core: CoreSettings,
    /// `[theme]`
    pub theme: ThemeColors,
    /// `[priorities]`
    pub priorities: PriorityConfig,
    /// `[modules.*]` in declaration order
    pub modules: Vec<NamedComponent>,
    /// `[services.*]` in declaration order
    pub services: Vec<NamedComponent>,
}

impl SentinelConfig {
    /// Parse a TOML document, skipping entries that do not fit the schema
    ///
    /// # Errors
    ///
    /// Fails only if `text` is not valid TOML or its root is not a table.
    pub fn parse(text: &str) -> Result<(Self, Vec<ConfigDiagnostic>), ConfigError> {
        let root: toml::Table = text.parse()?;
        let mut diagnostics = Vec::new();

        let core = section_or_default::<CoreSettings>(&root, "core", &mut diagnostics);
        let theme = section_or_default::<ThemeColors>(&root, "theme", &mut diagnostics);
        let priorities = match root.get("priorities") {
            Some(value) => PriorityConfig::from_value(value, &mut diagnostics),
            None => PriorityConfig::default(),
        };
        let modules = components(&root, "modules", &mut diagnostics);
        let services = components(&root, "services", &mut diagnostics);

        for key in root.keys() {
            if !matches!(
                key.as_str(),
                "core" | "theme" | "priorities" | "modules" | "services"
            ) {
                diagnostics.push(ConfigDiagnostic::new(key, "unknown top-level section ignored"));
            }
        }

        for diagnostic in &diagnostics {
            tracing::warn!(section = %diagnostic.section, "Config entry skipped: {}", diagnostic.message);
        }

        Ok((
            Self {
                core,
                theme,
                priorities,
                modules,
                services,
            },
            diagnostics,
        ))
    }

    /// Serialize back to TOML (used by `--print-config`)
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mut root = toml::Table::new();
        root.insert("core".into(), toml::Value::try_from(&self.core)?);
        root.insert("theme".into(), toml::Value::try_from(&self.theme)?);
        root.insert("priorities".into(), toml::Value::try_from(&self.priorities)?);

        for (section, entries) in [("modules", &self.modules), ("services", &self.services)] {
            let mut table = toml::Table::new();
            for entry in entries {
                table.insert(entry.name.clone(), toml::Value::try_from(&entry.settings)?);
            }
            root.insert(section.into(), toml::Value::Table(table));
        }

        Ok(toml::to_string_pretty(&root)?)
    }

    /// Look up a module entry by slug
    #[must_use]
    pub fn module(&self, slug: &str) -> Option<&ComponentSettings> {
        self.modules
            .iter()
            .find(|m| m.name == slug)
            .map(|m| &m.settings)
    }
}

fn section_or_default<T: DeserializeOwned + Default>(
    root: &toml::Table,
    key: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> T {
    match root.get(key) {
        None => T::default(),
        Some(value) => value.clone().try_into().unwrap_or_else(|e| {
            diagnostics.push(ConfigDiagnostic::new(
                key,
                format!("invalid section, using defaults ({e})"),
            ));
            T::default()
        }),
    }
}

fn components(
    root: &toml::Table,
    key: &str,
    diagnostics: &mut Vec<ConfigDiagnostic>,
) -> Vec<NamedComponent> {
    let Some(value) = root.get(key) else {
        return Vec::new();
    };
    let Some(table) = value.as_table() else {
        diagnostics.push(ConfigDiagnostic::new(key, "expected a table of components"));
        return Vec::new();
    };

    let mut parsed = Vec::with_capacity(table.len());
    for (name, entry) in table {
        let section = format!("{key}.{name}");
        match entry.clone().try_into::<ComponentSettings>() {
            Ok(settings) if settings.path.trim().is_empty() => {
                diagnostics.push(ConfigDiagnostic::new(section, "empty 'path'"));
            }
            Ok(settings) => parsed.push(NamedComponent {
                name: name.clone(),
                settings,
            }),
            Err(e) => diagnostics.push(ConfigDiagnostic::new(section, e.to_string())),
        }
    }
    parsed
}

// =============================================================================
// Loading
// =============================================================================

/// Result of loading configuration
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    /// The parsed configuration
    pub config: SentinelConfig,
    /// Where it came from
    pub source: ConfigSource,
    /// The file that was read, if any
    pub path: Option<PathBuf>,
    /// Entries that were skipped
    pub diagnostics: Vec<ConfigDiagnostic>,
}

/// The XDG default configuration path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sentinel").join("sentinel.toml"))
}

/// Load configuration following the documented priority
///
/// # Errors
///
/// Returns an error if an explicitly requested file (CLI or environment)
/// cannot be read or is not valid TOML, or if the XDG file exists but is
/// broken.
pub fn load_config(cli_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = cli_path {
        return load_config_from_path(path, ConfigSource::Cli);
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return load_config_from_path(Path::new(&path), ConfigSource::Env);
    }

    if let Some(path) = default_config_path().filter(|p| p.exists()) {
        return load_config_from_path(&path, ConfigSource::File);
    }

    tracing::info!("No configuration file found, using defaults");
    Ok(LoadedConfig {
        config: SentinelConfig::default(),
        source: ConfigSource::Default,
        path: None,
        diagnostics: Vec::new(),
    })
}

/// Load configuration from a specific file
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML.
pub fn load_config_from_path(path: &Path, source: ConfigSource) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let (config, diagnostics) = SentinelConfig::parse(&text)?;

    tracing::info!(
        path = %path.display(),
        source = %source,
        modules = config.modules.len(),
        services = config.services.len(),
        rules = config.priorities.rules.len(),
        skipped = diagnostics.len(),
        "Configuration loaded"
    );

    Ok(LoadedConfig {
        config,
        source,
        path: Some(path.to_path_buf()),
        diagnostics,
    })
}
