//! JSON-backed scene repository.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use tokio::sync::Mutex;

use nido_core::ports::rules::SceneRepository;
use nido_domain::error::NidoError;
use nido_domain::id::SceneId;
use nido_domain::scene::Scene;

use crate::{read_json_or_default, write_json_atomic};

/// Scene definitions persisted as one JSON file.
pub struct JsonSceneRepository {
    path: PathBuf,
    cache: Mutex<HashMap<SceneId, Scene>>,
}

impl JsonSceneRepository {
    /// Load the repository, reading existing definitions if present.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file exists but cannot be read or
    /// parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, NidoError> {
        let path = path.into();
        let scenes: Vec<Scene> = read_json_or_default(&path).await?;
        tracing::info!(path = %path.display(), count = scenes.len(), "loaded scenes");
        let cache = scenes.into_iter().map(|scene| (scene.id, scene)).collect();
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    async fn persist(&self, cache: &HashMap<SceneId, Scene>) -> Result<(), NidoError> {
        let mut scenes: Vec<&Scene> = cache.values().collect();
        scenes.sort_by_key(|scene| scene.id);
        write_json_atomic(&self.path, &scenes).await
    }
}

impl SceneRepository for JsonSceneRepository {
    fn create(&self, scene: Scene) -> impl Future<Output = Result<Scene, NidoError>> + Send {
        async move {
            scene.validate()?;
            let mut cache = self.cache.lock().await;
            cache.insert(scene.id, scene.clone());
            self.persist(&cache).await?;
            Ok(scene)
        }
    }

    fn get_by_id(
        &self,
        id: SceneId,
    ) -> impl Future<Output = Result<Option<Scene>, NidoError>> + Send {
        async move { Ok(self.cache.lock().await.get(&id).cloned()) }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<Scene>, NidoError>> + Send {
        async move {
            let cache = self.cache.lock().await;
            let mut scenes: Vec<Scene> = cache.values().cloned().collect();
            scenes.sort_by_key(|scene| scene.id);
            Ok(scenes)
        }
    }

    fn delete(&self, id: SceneId) -> impl Future<Output = Result<(), NidoError>> + Send {
        async move {
            let mut cache = self.cache.lock().await;
            cache.remove(&id);
            self.persist(&cache).await
        }
    }
}
