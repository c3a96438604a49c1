//! Definition repositories — persistence for rules and scenes.
//!
//! The admin surface that edits definitions is out of scope; the core
//! needs the read path, an update hook for `last_fired`, and creation
//! with validation (malformed definitions are rejected here, never at
//! evaluation time).

use std::future::Future;

use nido_domain::error::NidoError;
use nido_domain::id::{RuleId, SceneId};
use nido_domain::rule::Rule;
use nido_domain::scene::Scene;
use nido_domain::time::Timestamp;

/// Repository for persisting and querying [`Rule`]s.
pub trait RuleRepository: Send + Sync {
    /// Validate and create a new rule in storage.
    fn create(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send;

    /// Get a rule by its unique identifier.
    fn get_by_id(
        &self,
        id: RuleId,
    ) -> impl Future<Output = Result<Option<Rule>, NidoError>> + Send;

    /// Get all rules.
    fn get_all(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send;

    /// Get all enabled rules.
    fn list_enabled(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send;

    /// Validate and update an existing rule.
    fn update(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send;

    /// Delete a rule by its unique identifier.
    fn delete(&self, id: RuleId) -> impl Future<Output = Result<(), NidoError>> + Send;

    /// Record that a rule fired, updating its `last_fired` timestamp.
    fn record_fired(
        &self,
        id: RuleId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), NidoError>> + Send;
}

impl<T: RuleRepository> RuleRepository for std::sync::Arc<T> {
    fn create(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
        (**self).create(rule)
    }

    fn get_by_id(
        &self,
        id: RuleId,
    ) -> impl Future<Output = Result<Option<Rule>, NidoError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
        (**self).get_all()
    }

    fn list_enabled(&self) -> impl Future<Output = Result<Vec<Rule>, NidoError>> + Send {
        (**self).list_enabled()
    }

    fn update(&self, rule: Rule) -> impl Future<Output = Result<Rule, NidoError>> + Send {
        (**self).update(rule)
    }

    fn delete(&self, id: RuleId) -> impl Future<Output = Result<(), NidoError>> + Send {
        (**self).delete(id)
    }

    fn record_fired(
        &self,
        id: RuleId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), NidoError>> + Send {
        (**self).record_fired(id, at)
    }
}

/// Repository for persisting and querying [`Scene`]s.
pub trait SceneRepository: Send + Sync {
    /// Validate and create a new scene in storage.
    fn create(&self, scene: Scene) -> impl Future<Output = Result<Scene, NidoError>> + Send;

    /// Get a scene by its unique identifier.
    fn get_by_id(
        &self,
        id: SceneId,
    ) -> impl Future<Output = Result<Option<Scene>, NidoError>> + Send;

    /// Get all scenes.
    fn get_all(&self) -> impl Future<Output = Result<Vec<Scene>, NidoError>> + Send;

    /// Delete a scene by its unique identifier.
    fn delete(&self, id: SceneId) -> impl Future<Output = Result<(), NidoError>> + Send;
}

impl<T: SceneRepository> SceneRepository for std::sync::Arc<T> {
    fn create(&self, scene: Scene) -> impl Future<Output = Result<Scene, NidoError>> + Send {
        (**self).create(scene)
    }

    fn get_by_id(
        &self,
        id: SceneId,
    ) -> impl Future<Output = Result<Option<Scene>, NidoError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<Scene>, NidoError>> + Send {
        (**self).get_all()
    }

    fn delete(&self, id: SceneId) -> impl Future<Output = Result<(), NidoError>> + Send {
        (**self).delete(id)
    }
}
