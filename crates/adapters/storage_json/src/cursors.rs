//! JSON-backed event-bus cursor store.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use tokio::sync::Mutex;

use nido_core::ports::storage::CursorStore;
use nido_domain::error::NidoError;

use crate::{read_json_or_default, write_json_atomic};

/// Per-subscriber cursor positions persisted as one JSON file,
/// `subscriber → source → last acknowledged sequence`.
pub struct JsonCursorStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, HashMap<String, u64>>>,
}

impl JsonCursorStore {
    /// Load the store, reading existing cursors if present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file exists but cannot be read or
    /// parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, NidoError> {
        let path = path.into();
        let cursors: HashMap<String, HashMap<String, u64>> = read_json_or_default(&path).await?;
        tracing::info!(path = %path.display(), subscribers = cursors.len(), "loaded cursors");
        Ok(Self {
            path,
            cache: Mutex::new(cursors),
        })
    }
}

impl CursorStore for JsonCursorStore {
    fn load(
        &self,
        subscriber: &str,
    ) -> impl Future<Output = Result<HashMap<String, u64>, NidoError>> + Send {
        async move {
            Ok(self
                .cache
                .lock()
                .await
                .get(subscriber)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn store(
        &self,
        subscriber: &str,
        source: &str,
        sequence: u64,
    ) -> impl Future<Output = Result<(), NidoError>> + Send {
        async move {
            let mut cache = self.cache.lock().await;
            cache
                .entry(subscriber.to_string())
                .or_default()
                .insert(source.to_string(), sequence);
            write_json_atomic(&self.path, &*cache).await
        }
    }
}
