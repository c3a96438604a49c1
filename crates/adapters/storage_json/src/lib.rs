//! # nido-adapter-storage-json
//!
//! JSON-file persistence for the core's storage ports: rule and scene
//! definitions, last-known device state, and event-bus cursor positions.
//! Each store keeps an in-memory map and rewrites its file atomically
//! (temp file, then rename) on every mutation, so a crash never leaves a
//! half-written file behind.

mod cursors;
mod devices;
mod rules;
mod scenes;

pub use cursors::JsonCursorStore;
pub use devices::JsonDeviceStateStore;
pub use rules::JsonRuleRepository;
pub use scenes::JsonSceneRepository;

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use nido_domain::error::{NidoError, StorageError};

/// Read a JSON file, returning the default value when the file does not
/// exist yet.
pub(crate) async fn read_json_or_default<T>(path: &Path) -> Result<T, NidoError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
            StorageError::new("parse", format!("{}: {err}", path.display())).into()
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no file yet, starting fresh");
            Ok(T::default())
        }
        Err(err) => Err(StorageError::new("read", format!("{}: {err}", path.display())).into()),
    }
}

/// Serialize a value to pretty JSON and write it atomically: write to a
/// temp file next to the target, then rename over it.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), NidoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| StorageError::new("write", format!("{}: {err}", parent.display())))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| StorageError::new("serialize", err.to_string()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json)
        .await
        .map_err(|err| StorageError::new("write", format!("{}: {err}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|err| StorageError::new("write", format!("{}: {err}", path.display())))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::PathBuf;

    /// A unique path under the system temp dir; cleaned up by the OS.
    pub fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("nido-tests")
            .join(nido_domain::id::RuleId::new().to_string())
            .join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn should_return_default_for_missing_file() {
        let path = testutil::temp_file("missing.json");
        let value: HashMap<String, u64> = read_json_or_default(&path).await.unwrap();
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn should_roundtrip_through_atomic_write() {
        let path = testutil::temp_file("data.json");
        let value = HashMap::from([("a".to_string(), 1_u64)]);
        write_json_atomic(&path, &value).await.unwrap();
        let loaded: HashMap<String, u64> = read_json_or_default(&path).await.unwrap();
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn should_surface_parse_errors() {
        let path = testutil::temp_file("broken.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "not json").await.unwrap();
        let result: Result<HashMap<String, u64>, _> = read_json_or_default(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn should_not_leave_temp_file_behind() {
        let path = testutil::temp_file("clean.json");
        write_json_atomic(&path, &vec![1, 2, 3]).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }
}
