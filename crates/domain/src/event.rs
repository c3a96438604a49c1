//! Event — an immutable record flowing through the event bus.
//!
//! Events carry a typed payload, the source that produced them, and a
//! per-source monotonically increasing sequence number assigned by the bus
//! at publish time. Delivery is at-least-once; the `(source, sequence)`
//! pair is the idempotency key consumers deduplicate on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::device::{AttributeValue, Capability};
use crate::id::{DeviceId, RuleId, SceneId};
use crate::time::Timestamp;

/// Typed event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A device's state changed (confirmed telemetry or command effect).
    TelemetryChanged {
        device: DeviceId,
        changes: HashMap<Capability, AttributeValue>,
    },
    /// A scheduled trigger became due for a specific rule.
    TimerFired { rule: RuleId },
    /// A tracked user crossed into a geofence.
    GeofenceEntered { user: String },
    /// A tracked user crossed out of a geofence.
    GeofenceExited { user: String },
    /// A voice assistant forwarded a parsed command.
    VoiceCommandReceived { user: String, command: String },
    /// Something requested a scene activation.
    SceneRequested { scene: SceneId },
}

impl EventPayload {
    /// The discriminant used by triggers and subscription filters.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TelemetryChanged { .. } => EventType::TelemetryChanged,
            Self::TimerFired { .. } => EventType::TimerFired,
            Self::GeofenceEntered { .. } => EventType::GeofenceEntered,
            Self::GeofenceExited { .. } => EventType::GeofenceExited,
            Self::VoiceCommandReceived { .. } => EventType::VoiceCommandReceived,
            Self::SceneRequested { .. } => EventType::SceneRequested,
        }
    }
}

/// Event discriminant, used for trigger matching and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TelemetryChanged,
    TimerFired,
    GeofenceEntered,
    GeofenceExited,
    VoiceCommandReceived,
    SceneRequested,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TelemetryChanged => "telemetry_changed",
            Self::TimerFired => "timer_fired",
            Self::GeofenceEntered => "geofence_entered",
            Self::GeofenceExited => "geofence_exited",
            Self::VoiceCommandReceived => "voice_command_received",
            Self::SceneRequested => "scene_requested",
        };
        f.write_str(name)
    }
}

/// Who produced an event. Sequence numbers increase per source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    Device { device: DeviceId },
    User { user: String },
    Scheduler,
}

impl EventSource {
    /// Stable string key for cursor storage and sequence counters.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Device { device } => format!("device:{device}"),
            Self::User { user } => format!("user:{user}"),
            Self::Scheduler => "scheduler".to_string(),
        }
    }
}

/// Delivery priority under backpressure. Low-priority events are dropped
/// before any high-priority event ever is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    Low,
    High,
}

/// An event flowing through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: Timestamp,
    /// Monotonically increasing per source; assigned by the bus.
    pub sequence: u64,
}

impl Event {
    /// Create an event with sequence zero; the bus assigns the real
    /// sequence number at publish time.
    #[must_use]
    pub fn new(payload: EventPayload, source: EventSource, timestamp: Timestamp) -> Self {
        Self {
            payload,
            source,
            timestamp,
            sequence: 0,
        }
    }

    /// The discriminant of the payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// The idempotency key consumers deduplicate on.
    #[must_use]
    pub fn idempotency_key(&self) -> (String, u64) {
        (self.source.key(), self.sequence)
    }

    /// Delivery priority: geofence transitions and security-relevant
    /// telemetry (lock state) are high; routine telemetry is low.
    #[must_use]
    pub fn priority(&self) -> EventPriority {
        match &self.payload {
            EventPayload::GeofenceEntered { .. } | EventPayload::GeofenceExited { .. } => {
                EventPriority::High
            }
            EventPayload::TelemetryChanged { changes, .. } => {
                if changes.keys().any(|c| c.is_security_relevant()) {
                    EventPriority::High
                } else {
                    EventPriority::Low
                }
            }
            EventPayload::TimerFired { .. }
            | EventPayload::VoiceCommandReceived { .. }
            | EventPayload::SceneRequested { .. } => EventPriority::High,
        }
    }
}
