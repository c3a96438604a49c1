//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! Rule-definition problems are caught at creation time and reported as
//! [`ValidationError`]; evaluation itself is total and never produces an
//! error (absent devices and unknown attributes evaluate to `false`).

use crate::device::Capability;
use crate::id::{DeviceId, RuleId, SceneId};

/// Top-level error for the nido core.
#[derive(Debug, thiserror::Error)]
pub enum NidoError {
    /// A rule or scene definition was rejected at creation time.
    #[error("invalid definition")]
    Validation(#[from] ValidationError),

    /// The referenced device is not in the registry.
    #[error("device not found: {device}")]
    DeviceNotFound { device: DeviceId },

    /// The referenced scene does not exist.
    #[error("scene not found: {scene}")]
    SceneNotFound { scene: SceneId },

    /// The device is still referenced by a rule or scene and can only be
    /// soft-deactivated, never removed.
    #[error("device {device} is referenced by a rule or scene; deactivate it instead")]
    DeviceInUse { device: DeviceId },

    /// The referenced rule does not exist.
    #[error("rule not found: {rule}")]
    RuleNotFound { rule: RuleId },

    /// A command targeted an attribute the device cannot set.
    #[error("device {device} does not support capability {capability}")]
    CapabilityUnsupported {
        device: DeviceId,
        capability: Capability,
    },

    /// A command exhausted its retry budget without an acknowledgement.
    #[error("command to {device} timed out after {attempts} attempts")]
    CommandTimeout { device: DeviceId, attempts: u32 },

    /// The device reported the command as invalid; not retried.
    #[error("command to {device} rejected: {reason}")]
    CommandRejected { device: DeviceId, reason: String },

    /// A persistence adapter failed.
    #[error("storage error")]
    Storage(#[from] StorageError),
}

/// Reasons a rule or scene definition is rejected at creation time.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The name must not be empty.
    #[error("name must not be empty")]
    EmptyName,

    /// A scene must target at least one device.
    #[error("scene must contain at least one entry")]
    EmptyScene,

    /// A rule trigger must name at least one event type.
    #[error("trigger must name at least one event type")]
    NoTriggerEvents,

    /// The condition tree nests deeper than the allowed maximum.
    #[error("condition tree exceeds maximum depth ({depth})")]
    ConditionTooDeep { depth: usize },

    /// A time window bound is not `HH:MM`.
    #[error("invalid time window bound: {value:?}")]
    InvalidTimeWindow { value: String },

    /// A time-of-day schedule is not `HH:MM`.
    #[error("invalid time of day: {value:?}")]
    InvalidTimeOfDay { value: String },

    /// A cron schedule expression failed to parse.
    #[error("invalid cron expression: {expression:?}")]
    InvalidCron { expression: String },

    /// Interval schedules must tick at least once a second.
    #[error("interval schedule must be at least one second")]
    ZeroInterval,

    /// A rule with a schedule must also trigger on timer events.
    #[error("scheduled rule must include the timer-fired trigger")]
    ScheduleWithoutTimerTrigger,
}

/// Failure reported by a persistence adapter.
#[derive(Debug, thiserror::Error)]
#[error("storage {operation} failed: {detail}")]
pub struct StorageError {
    /// The operation that failed (e.g. `"read"`, `"write"`).
    pub operation: &'static str,
    /// Human-readable detail from the underlying store.
    pub detail: String,
}

impl StorageError {
    /// Build a storage error for a failed operation.
    #[must_use]
    pub fn new(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: detail.into(),
        }
    }
}
