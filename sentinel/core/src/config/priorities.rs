//! `[priorities]` section: report lifetime, idle policy, and rules
//!
//! Rules are deserialised one by one so a single bad rule does not discard
//! the whole list. Rule order is preserved; it is the arbitration tie-break.

use serde::{Deserialize, Serialize};

use super::ConfigDiagnostic;

/// `when.state`: one label or a list of labels
///
/// An empty list means "any state".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMatch {
    /// A single label
    One(String),
    /// Any of these labels
    Many(Vec<String>),
}

impl Default for StateMatch {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl StateMatch {
    /// Normalised label list
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        match self {
            Self::One(label) => vec![label.clone()],
            Self::Many(labels) => labels.clone(),
        }
    }
}

/// `when` clause of a rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhenConfig {
    /// Module whose report is matched
    pub module: String,
    /// Labels that match
    #[serde(default)]
    pub state: StateMatch,
}

/// One `[[priorities.rules]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Match condition
    pub when: WhenConfig,
    /// Candidate weight
    #[serde(default)]
    pub weight: i64,
    /// Screen to show; defaults to `when.module`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<String>,
}

impl RuleConfig {
    /// Target screen after defaulting
    #[must_use]
    pub fn target_screen(&self) -> &str {
        self.screen.as_deref().unwrap_or(&self.when.module)
    }
}

/// `[priorities.idle]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Screens rotated through when nothing claims the display
    pub cycle: Vec<String>,
    /// Seconds spent on each idle screen
    pub dwell_seconds: f64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            cycle: Vec::new(),
            dwell_seconds: 20.0,
        }
    }
}

/// `[priorities]`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Lifetime applied to reports without `expires_in`; 0 means never
    #[serde(default)]
    pub timeout_seconds: f64,
    /// Idle policy
    #[serde(default)]
    pub idle: IdleConfig,
    /// Rules in declaration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl PriorityConfig {
    /// Build from a raw TOML value, skipping malformed parts
    pub(crate) fn from_value(value: &toml::Value, diagnostics: &mut Vec<ConfigDiagnostic>) -> Self {
        let Some(table) = value.as_table() else {
            diagnostics.push(ConfigDiagnostic::new("priorities", "expected a table"));
            return Self::default();
        };

        let mut config = Self::default();

        match table.get("timeout_seconds") {
            None => {}
            Some(v) => match number(v) {
                Some(secs) => config.timeout_seconds = secs.max(0.0),
                None => diagnostics.push(ConfigDiagnostic::new(
                    "priorities.timeout_seconds",
                    "expected a number",
                )),
            },
        }

        if let Some(idle) = table.get("idle") {
            match idle.clone().try_into::<IdleConfig>() {
                Ok(mut idle) => {
                    idle.dwell_seconds = idle.dwell_seconds.max(0.0);
                    config.idle = idle;
                }
                Err(e) => diagnostics.push(ConfigDiagnostic::new("priorities.idle", e.to_string())),
            }
        }

        match table.get("rules") {
            None => {}
            Some(toml::Value::Array(rules)) => {
                for (index, raw) in rules.iter().enumerate() {
                    let section = format!("priorities.rules[{index}]");
                    match raw.clone().try_into::<RuleConfig>() {
                        Ok(rule) if rule.when.module.trim().is_empty() => {
                            diagnostics.push(ConfigDiagnostic::new(section, "empty 'when.module'"));
                        }
                        Ok(rule) => config.rules.push(rule),
                        Err(e) => diagnostics.push(ConfigDiagnostic::new(section, e.to_string())),
                    }
                }
            }
            Some(_) => diagnostics.push(ConfigDiagnostic::new(
                "priorities.rules",
                "expected an array of rules",
            )),
        }

        config
    }
}

fn number(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        #[allow(clippy::cast_precision_loss)]
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}
