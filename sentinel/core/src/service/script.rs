//! `script` service: replays a fixed list of events
//!
//! Stands in for a real producer (MQTT bridge, video capture) in demos and
//! tests. Each step waits `after_secs` from the previous one, then publishes
//! `payload` (converted to JSON) on `topic`.
//!
//! ```toml
//! [services.detections]
//! path = "script"
//! [services.detections.settings]
//! loop = true
//! [[services.detections.settings.steps]]
//! after_secs = 2
//! topic = "services.mqtt.detection"
//! payload = { state = "danger" }
//! ```

use std::time::Duration;

use serde::Deserialize;

use super::{Service, ServiceContext, ServiceError};

#[derive(Clone, Debug, Deserialize)]
struct ScriptStep {
    #[serde(default)]
    after_secs: f64,
    topic: String,
    #[serde(default)]
    payload: Option<toml::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptSettings {
    #[serde(rename = "loop")]
    looping: bool,
    steps: Vec<ScriptStep>,
}

/// A prepared step
#[derive(Clone, Debug)]
struct Step {
    after: Duration,
    topic: String,
    payload: serde_json::Value,
}

/// Replays scripted events onto the bus
#[derive(Debug)]
pub struct ScriptService {
    looping: bool,
    steps: Vec<Step>,
}

impl ScriptService {
    /// Build from a `settings` table
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidSettings`] if the table does not fit or
    /// a payload cannot be represented as JSON.
    pub fn from_settings(name: &str, settings: &toml::Table) -> Result<Self, ServiceError> {
        let invalid = |message: String| ServiceError::InvalidSettings {
            name: name.to_string(),
            message,
        };
        let parsed: ScriptSettings = toml::Value::Table(settings.clone())
            .try_into()
            .map_err(|e: toml::de::Error| invalid(e.to_string()))?;

        let mut steps = Vec::with_capacity(parsed.steps.len());
        for (i, step) in parsed.steps.into_iter().enumerate() {
            let payload = match step.payload {
                Some(value) => serde_json::to_value(value)
                    .map_err(|e| invalid(format!("steps[{i}].payload: {e}")))?,
                None => serde_json::Value::Null,
            };
            steps.push(Step {
                after: Duration::try_from_secs_f64(step.after_secs).unwrap_or(Duration::ZERO),
                topic: step.topic,
                payload,
            });
        }

        let mut looping = parsed.looping;
        if looping && steps.iter().all(|s| s.after.is_zero()) {
            tracing::warn!(service = %name, "Looping script without delays, playing once");
            looping = false;
        }
        Ok(Self { looping, steps })
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the script is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Service for ScriptService {
    fn start(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        ctx.publish_kind("status", serde_json::json!({"state": "starting", "steps": self.steps.len()}));
        Ok(())
    }

    fn run(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
        ctx.publish_kind("status", serde_json::json!({"state": "running"}));
        let mut rounds = 0_u64;
        'outer: loop {
            for step in &self.steps {
                if ctx.wait_cancelled(step.after) {
                    break 'outer;
                }
                let report = ctx.publish(step.topic.clone(), step.payload.clone());
                tracing::debug!(
                    service = %ctx.name(),
                    topic = %step.topic,
                    delivered = report.delivered,
                    "Script step published"
                );
            }
            rounds += 1;
            if !self.looping {
                break;
            }
        }
        ctx.publish_kind("status", serde_json::json!({"state": "stopped", "rounds": rounds}));
        Ok(())
    }
}
