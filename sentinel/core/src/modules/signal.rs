//! `signal` module: turns bus payloads into state reports
//!
//! Subscribes to the configured topics and reads a label out of each
//! payload. A JSON object contributes its `field` entry (default `state`), a
//! bare JSON or Rust string is the label itself. `null` or one of the clear
//! labels releases the claim.
//!
//! ```toml
//! [modules.camera]
//! path = "signal"
//! [modules.camera.settings]
//! title = "PORCH CAMERA"
//! topics = ["services.mqtt.detection"]
//! field = "state"
//! weight = 100          # optional override of the rule weight
//! expires_in = 5.0      # optional, seconds
//! ```

use serde::Deserialize;

use crate::arbitration::ReportOptions;
use crate::bus::Event;
use crate::render::RenderTarget;

use super::{Module, ModuleContext, ModuleError};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct SignalSettings {
    title: Option<String>,
    topics: Vec<String>,
    field: String,
    weight: Option<i64>,
    expires_in: Option<f64>,
    clear_labels: Vec<String>,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            title: None,
            topics: Vec::new(),
            field: "state".to_string(),
            weight: None,
            expires_in: None,
            clear_labels: vec!["clear".to_string(), "none".to_string()],
        }
    }
}

/// What a payload asks for
#[derive(Debug, PartialEq, Eq)]
enum Signal {
    Report(String),
    Clear,
    Ignore,
}

/// Reports labels read from bus payloads
#[derive(Debug)]
pub struct SignalModule {
    settings: SignalSettings,
    title: String,
    label: Option<String>,
    last_topic: Option<String>,
    last_payload: String,
    events: u64,
}

impl SignalModule {
    /// Build from a `settings` table
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidSettings`] if the table does not fit.
    pub fn from_settings(slug: &str, settings: &toml::Table) -> Result<Self, ModuleError> {
        let settings: SignalSettings = toml::Value::Table(settings.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ModuleError::InvalidSettings {
                slug: slug.to_string(),
                message: e.to_string(),
            })?;
        let title = settings
            .title
            .clone()
            .unwrap_or_else(|| slug.to_uppercase());
        Ok(Self {
            settings,
            title,
            label: None,
            last_topic: None,
            last_payload: String::new(),
            events: 0,
        })
    }

    /// Last label reported
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn read(&self, event: &Event) -> Signal {
        let payload = event.payload();
        let raw = if let Some(value) = payload.json() {
            match value {
                serde_json::Value::Object(map) => match map.get(&self.settings.field) {
                    None => return Signal::Ignore,
                    Some(serde_json::Value::Null) => return Signal::Clear,
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                },
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => return Signal::Clear,
                _ => return Signal::Ignore,
            }
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else {
            return Signal::Ignore;
        };

        let label = raw.trim();
        if label.is_empty()
            || self
                .settings
                .clear_labels
                .iter()
                .any(|c| c.eq_ignore_ascii_case(label))
        {
            Signal::Clear
        } else {
            Signal::Report(label.to_string())
        }
    }
}

fn summarize(event: &Event) -> String {
    let text = format!("{:?}", event.payload());
    if text.chars().count() > 48 {
        let cut: String = text.chars().take(45).collect();
        format!("{cut}...")
    } else {
        text
    }
}

impl Module for SignalModule {
    fn on_load(&mut self, ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        if self.settings.topics.is_empty() {
            tracing::warn!(module = %ctx.slug(), "Signal module has no topics");
        }
        for topic in &self.settings.topics {
            ctx.subscribe(topic.clone());
        }
        Ok(())
    }

    fn on_bus_event(&mut self, event: &Event, ctx: &mut ModuleContext) -> Result<(), ModuleError> {
        self.events += 1;
        self.last_topic = Some(event.topic().to_string());
        self.last_payload = summarize(event);

        match self.read(event) {
            Signal::Ignore => {}
            Signal::Clear => {
                self.label = None;
                ctx.clear_state();
            }
            Signal::Report(label) => {
                let mut options = ReportOptions::new().metadata("topic", event.topic());
                if let Some(weight) = self.settings.weight {
                    options = options.weight(weight);
                }
                if let Some(secs) = self.settings.expires_in {
                    options = options.expires_in_secs(secs);
                }
                ctx.report_state(Some(&label), options);
                self.label = Some(label);
            }
        }
        Ok(())
    }

    fn render(&mut self, target: &mut dyn RenderTarget, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let header = ctx.app().alert().title;
        target.put_str(0, 0, &header);
        target.put_str(0, 2, &self.title);
        target.put_str(0, 3, &format!("state: {}", self.label.as_deref().unwrap_or("-")));
        if let Some(topic) = &self.last_topic {
            target.put_str(0, 4, &format!("from:  {topic}"));
            target.put_str(0, 5, &self.last_payload);
        }
        target.put_str(0, 6, &format!("events: {}", self.events));
        Ok(())
    }
}
