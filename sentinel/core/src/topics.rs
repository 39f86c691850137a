//! Topic Names
//!
//! Topics are hierarchical, dot-separated strings. Services follow the
//! `services.<name>.<kind>` convention; the names below are reserved and
//! used verbatim by external collaborators.

/// Request a hard reset of services and modules
pub const SYSTEM_RESTART: &str = "system.restart";

/// Change the global alert level / header title
pub const UI_ALERT: &str = "ui.alert";

/// Object detection events from the MQTT feed
pub const MQTT_DETECTION: &str = "services.mqtt.detection";

/// Overhead flight events from the MQTT feed
pub const MQTT_FLIGHTS: &str = "services.mqtt.flights";

/// MQTT connection status
pub const MQTT_STATUS: &str = "services.mqtt.status";

/// Decoded video frames
pub const VIDEO_FRAME: &str = "services.video.frame";

/// Video capture status
pub const VIDEO_STATUS: &str = "services.video.status";

/// All reserved topics
pub const RESERVED: &[&str] = &[
    SYSTEM_RESTART,
    UI_ALERT,
    MQTT_DETECTION,
    MQTT_FLIGHTS,
    MQTT_STATUS,
    VIDEO_FRAME,
    VIDEO_STATUS,
];

/// Build a `services.<name>.<kind>` topic
#[must_use]
pub fn service_topic(service: &str, kind: &str) -> String {
    format!("services.{service}.{kind}")
}

/// Whether `topic` is a non-empty sequence of non-empty dot-separated segments
#[must_use]
pub fn is_well_formed(topic: &str) -> bool {
    !topic.is_empty()
        && topic.split('.').all(|segment| {
            !segment.is_empty() && !segment.chars().any(char::is_whitespace)
        })
}
