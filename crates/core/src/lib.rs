//! # nido-core
//!
//! Orchestration layer — use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound
//!   ports):
//!   - `DeviceAdapter` — protocol-specific command/telemetry boundary
//!   - `NotificationSink` — fire-and-forget alerts and audit entries
//!   - `RuleRepository` / `SceneRepository` — definition storage
//!   - `CursorStore` / `DeviceStateStore` — restart-surviving state
//! - Provide the **in-process machinery** that needs no external IO:
//!   - `DeviceRegistry` — last-known device state, per-device serialized
//!     writes
//!   - `EventBus` — ordered, at-least-once delivery with durable cursors
//!   - `RuleEngine` — trigger matching, cooldowns, condition evaluation,
//!     deterministic conflict resolution
//!   - `Scheduler` — time-of-day, sun-relative, interval and cron triggers
//!   - `SceneExecutor` — sequential/parallel activation with per-device
//!     outcomes
//!   - `CommandDispatcher` — retry/backoff state machine around adapters
//!   - `Runtime` — explicit lifecycle wiring the above into worker loops
//!
//! ## Dependency rule
//! Depends on `nido-domain` only (plus `tokio::sync` for channels and
//! `dashmap` for per-key locking). Never imports adapter crates. Adapters
//! depend on *this* crate, not the reverse.

pub mod bus;
pub mod dispatcher;
pub mod engine;
pub mod notify;
pub mod ports;
pub mod registry;
pub mod runtime;
pub mod scene;
pub mod scheduler;
