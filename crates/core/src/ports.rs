//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the orchestration core and the outside
//! world. They are defined here (in `core`) so that both the use-case
//! layer and the adapter layer can depend on them without creating
//! circular dependencies.

pub mod adapter;
pub mod event_bus;
pub mod notification;
pub mod rules;
pub mod storage;

pub use adapter::{AdapterError, DeviceAdapter, Telemetry};
pub use event_bus::EventPublisher;
pub use notification::{NotificationKind, NotificationSink};
pub use rules::{RuleRepository, SceneRepository};
pub use storage::{CursorStore, DeviceStateStore};
