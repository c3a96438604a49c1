//! Command dispatcher — the retry/timeout state machine around adapters.
//!
//! `send` walks a command through `Pending → Sent → {Acknowledged,
//! TimedOut, Rejected}`. Timeouts and connectivity loss retry with
//! exponential backoff up to the configured budget; a rejection surfaces
//! immediately and is never retried. A command that exhausts its budget
//! marks the device unreachable and emits a notification — the registry's
//! last-known-good state is never touched by failures. Pending commands
//! can be cancelled by identifier.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use nido_domain::command::{CommandResult, CommandStatus};
use nido_domain::device::{AttributeValue, Capability};
use nido_domain::error::NidoError;
use nido_domain::id::{CommandId, DeviceId};
use nido_domain::time::now;

use crate::ports::adapter::{AdapterError, DeviceAdapter};
use crate::ports::event_bus::EventPublisher;
use crate::ports::notification::{NotificationKind, NotificationSink};
use crate::registry::DeviceRegistry;

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retries after the first attempt; total attempts are
    /// `max_retries + 1`.
    pub max_retries: u32,
    /// Per-attempt deadline for the adapter to acknowledge.
    pub command_timeout: Duration,
    /// First backoff delay; doubled after every failed attempt.
    pub backoff_base: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            command_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Fans resolved actions out to a device adapter with completion tracking.
pub struct CommandDispatcher<A, P, N> {
    adapter: A,
    registry: Arc<DeviceRegistry<P>>,
    sink: N,
    config: DispatcherConfig,
    pending: DashMap<CommandId, Arc<AtomicBool>>,
}

impl<A, P, N> CommandDispatcher<A, P, N>
where
    A: DeviceAdapter,
    P: EventPublisher,
    N: NotificationSink,
{
    /// Create a dispatcher over an adapter and the registry.
    pub fn new(
        adapter: A,
        registry: Arc<DeviceRegistry<P>>,
        sink: N,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            adapter,
            registry,
            sink,
            config,
            pending: DashMap::new(),
        }
    }

    /// Dispatch desired attribute changes to a device.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::DeviceNotFound`] for unknown or deactivated
    /// devices and [`NidoError::CapabilityUnsupported`] when a change
    /// targets an attribute the device cannot set. Delivery failures are
    /// reported in the returned [`CommandResult`], not as errors.
    pub async fn send(
        &self,
        device: &DeviceId,
        changes: HashMap<Capability, AttributeValue>,
    ) -> Result<CommandResult, NidoError> {
        self.send_as(CommandId::new(), device, changes).await
    }

    /// Dispatch with a caller-chosen command id, so the caller can cancel
    /// the command while it is in flight.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_as(
        &self,
        command: CommandId,
        device: &DeviceId,
        changes: HashMap<Capability, AttributeValue>,
    ) -> Result<CommandResult, NidoError> {
        let state = self
            .registry
            .get_state(device)
            .filter(|d| d.active)
            .ok_or_else(|| NidoError::DeviceNotFound {
                device: device.clone(),
            })?;
        for capability in changes.keys() {
            if !state.supports(*capability) {
                return Err(NidoError::CapabilityUnsupported {
                    device: device.clone(),
                    capability: *capability,
                });
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending.insert(command, cancelled.clone());
        let result = self.drive(command, device, &changes, &cancelled).await;
        self.pending.remove(&command);

        match result.status {
            CommandStatus::Acknowledged => {
                self.registry.confirm_command(device, &changes, now()).await?;
                tracing::debug!(command = %command, device = %device, attempts = result.attempts, "command acknowledged");
            }
            CommandStatus::TimedOut => {
                self.registry.mark_unreachable(device);
                tracing::warn!(command = %command, device = %device, attempts = result.attempts, "command timed out, device marked unreachable");
                self.sink.notify(
                    NotificationKind::CommandFailed,
                    serde_json::json!({
                        "command": command,
                        "device": device,
                        "status": "timed_out",
                        "attempts": result.attempts,
                    }),
                );
                if changes.keys().any(|c| c.is_security_relevant()) {
                    self.sink.notify(
                        NotificationKind::SecurityAlert,
                        serde_json::json!({
                            "device": device,
                            "detail": "security-relevant command did not reach the device",
                        }),
                    );
                }
            }
            CommandStatus::Rejected => {
                tracing::warn!(command = %command, device = %device, error = ?result.error, "command rejected by device");
                self.sink.notify(
                    NotificationKind::CommandFailed,
                    serde_json::json!({
                        "command": command,
                        "device": device,
                        "status": "rejected",
                        "error": result.error,
                    }),
                );
            }
            CommandStatus::Cancelled => {
                tracing::debug!(command = %command, device = %device, "command cancelled");
            }
            CommandStatus::Pending | CommandStatus::Sent => {}
        }
        Ok(result)
    }

    /// Cancel a pending command; stops further retries. Returns `false`
    /// when the command is not in flight.
    pub fn cancel(&self, command: CommandId) -> bool {
        match self.pending.get(&command) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    async fn drive(
        &self,
        command: CommandId,
        device: &DeviceId,
        changes: &HashMap<Capability, AttributeValue>,
        cancelled: &AtomicBool,
    ) -> CommandResult {
        let max_attempts = self.config.max_retries + 1;
        let mut attempts = 0;
        let mut last_error: Option<String> = None;

        while attempts < max_attempts {
            if cancelled.load(Ordering::Relaxed) {
                return CommandResult {
                    command,
                    device: device.clone(),
                    status: CommandStatus::Cancelled,
                    attempts,
                    error: Some("cancelled before completion".to_string()),
                };
            }
            attempts += 1;
            tracing::trace!(command = %command, device = %device, attempt = attempts, "sending command");

            let attempt =
                tokio::time::timeout(self.config.command_timeout, self.adapter.send_command(device, changes))
                    .await;
            match attempt {
                Ok(Ok(())) => {
                    return CommandResult {
                        command,
                        device: device.clone(),
                        status: CommandStatus::Acknowledged,
                        attempts,
                        error: None,
                    };
                }
                Ok(Err(AdapterError::Rejected(reason))) => {
                    return CommandResult {
                        command,
                        device: device.clone(),
                        status: CommandStatus::Rejected,
                        attempts,
                        error: Some(reason),
                    };
                }
                Ok(Err(err @ (AdapterError::Timeout | AdapterError::ConnectivityLost))) => {
                    last_error = Some(err.to_string());
                }
                Err(_elapsed) => {
                    last_error = Some("no acknowledgement within the deadline".to_string());
                }
            }

            if attempts < max_attempts {
                let backoff = self.config.backoff_base * 2_u32.pow(attempts - 1);
                tracing::debug!(command = %command, device = %device, attempt = attempts, backoff_ms = backoff.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(backoff).await;
            }
        }

        CommandResult {
            command,
            device: device.clone(),
            status: CommandStatus::TimedOut,
            attempts,
            error: last_error,
        }
    }
}
