//! JSON-backed device state store.

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::Mutex;

use nido_core::ports::storage::DeviceStateStore;
use nido_domain::device::Device;
use nido_domain::error::NidoError;

use crate::{read_json_or_default, write_json_atomic};

/// Last-known device state persisted as one JSON file.
pub struct JsonDeviceStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDeviceStateStore {
    /// Create a store over the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl DeviceStateStore for JsonDeviceStateStore {
    fn load_all(&self) -> impl Future<Output = Result<Vec<Device>, NidoError>> + Send {
        async move {
            let devices: Vec<Device> = read_json_or_default(&self.path).await?;
            tracing::info!(path = %self.path.display(), count = devices.len(), "loaded devices");
            Ok(devices)
        }
    }

    fn save_all(&self, devices: &[Device]) -> impl Future<Output = Result<(), NidoError>> + Send {
        let mut sorted: Vec<Device> = devices.to_vec();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        async move {
            let _guard = self.write_lock.lock().await;
            write_json_atomic(&self.path, &sorted).await
        }
    }
}
