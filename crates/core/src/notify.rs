//! Tracing-backed notification sink.
//!
//! The default sink writes notifications to the log. Deployments that
//! push to a real channel (mobile push, chat webhook, …) implement
//! [`NotificationSink`] in an adapter crate; failures there must be
//! swallowed, never propagated into the core.

use crate::ports::notification::{NotificationKind, NotificationSink};

/// Sink that logs every notification through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, kind: NotificationKind, payload: serde_json::Value) {
        match kind {
            NotificationKind::SecurityAlert => {
                tracing::warn!(kind = %kind, %payload, "notification");
            }
            NotificationKind::CommandFailed | NotificationKind::ActionDropped => {
                tracing::warn!(kind = %kind, %payload, "notification");
            }
            NotificationKind::RuleFired | NotificationKind::SceneActivated => {
                tracing::info!(kind = %kind, %payload, "notification");
            }
        }
    }
}
