//! Notification sink port — fire-and-forget alerts and audit entries.
//!
//! The sink is called synchronously and must never block the core;
//! implementations that do real IO are expected to hand the payload to a
//! background task. Sink failures are the sink's problem, not ours.

use serde::Serialize;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A security-relevant command failed or a security event occurred.
    SecurityAlert,
    /// A rule fired; audit trail entry.
    RuleFired,
    /// A scene activation finished; carries the per-device summary.
    SceneActivated,
    /// A command exhausted its retries or was rejected.
    CommandFailed,
    /// A rule action referenced a device or scene that no longer exists.
    ActionDropped,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SecurityAlert => "security_alert",
            Self::RuleFired => "rule_fired",
            Self::SceneActivated => "scene_activated",
            Self::CommandFailed => "command_failed",
            Self::ActionDropped => "action_dropped",
        };
        f.write_str(name)
    }
}

/// Receives fire-and-forget notifications from the core.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Must not block.
    fn notify(&self, kind: NotificationKind, payload: serde_json::Value);
}

impl<T: NotificationSink> NotificationSink for std::sync::Arc<T> {
    fn notify(&self, kind: NotificationKind, payload: serde_json::Value) {
        (**self).notify(kind, payload);
    }
}
