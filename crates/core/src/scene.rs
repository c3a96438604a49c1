//! Scene executor — atomic-in-intent activation of device bundles.
//!
//! Activation is best-effort parallel or sequential dispatch with
//! per-device outcome tracking. The overall result is `Succeeded` only
//! when every device applied; anything else is `Partial` — a per-device
//! failure is never silently swallowed. Activations are cancellable by
//! identifier; cancellation stops further dispatch but never rolls back
//! commands a device already acknowledged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::task::JoinSet;

use nido_domain::command::{ActivationResult, DeviceOutcome};
use nido_domain::error::NidoError;
use nido_domain::id::{ActivationId, SceneId};
use nido_domain::scene::{ActivationMode, Scene};

use crate::dispatcher::CommandDispatcher;
use crate::ports::adapter::DeviceAdapter;
use crate::ports::event_bus::EventPublisher;
use crate::ports::notification::{NotificationKind, NotificationSink};
use crate::ports::rules::SceneRepository;

/// Activates scenes through the command dispatcher.
pub struct SceneExecutor<S, A, P, N> {
    scenes: S,
    dispatcher: Arc<CommandDispatcher<A, P, N>>,
    sink: N,
    active: DashMap<ActivationId, Arc<AtomicBool>>,
}

impl<S, A, P, N> SceneExecutor<S, A, P, N>
where
    S: SceneRepository,
    A: DeviceAdapter + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
    N: NotificationSink + Send + Sync + 'static,
{
    /// Create an executor over a scene repository and dispatcher.
    pub fn new(scenes: S, dispatcher: Arc<CommandDispatcher<A, P, N>>, sink: N) -> Self {
        Self {
            scenes,
            dispatcher,
            sink,
            active: DashMap::new(),
        }
    }

    /// Activate a scene and wait for the full per-device report.
    ///
    /// # Errors
    ///
    /// Returns [`NidoError::SceneNotFound`] for unknown scenes or a
    /// storage error from the repository. Per-device delivery failures
    /// are reported in the result, not as errors.
    pub async fn activate(&self, scene_id: SceneId) -> Result<ActivationResult, NidoError> {
        self.activate_as(ActivationId::new(), scene_id).await
    }

    /// Activate with a caller-chosen activation id, so the caller can
    /// cancel the activation while it is in flight.
    ///
    /// # Errors
    ///
    /// See [`activate`](Self::activate).
    pub async fn activate_as(
        &self,
        activation: ActivationId,
        scene_id: SceneId,
    ) -> Result<ActivationResult, NidoError> {
        let scene = self
            .scenes
            .get_by_id(scene_id)
            .await?
            .ok_or(NidoError::SceneNotFound { scene: scene_id })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.insert(activation, cancelled.clone());
        tracing::info!(scene = %scene_id, name = %scene.name, mode = %scene.mode, "activating scene");

        let outcomes = match scene.mode {
            ActivationMode::Sequential => self.run_sequential(&scene, &cancelled).await,
            ActivationMode::Parallel => self.run_parallel(&scene, &cancelled).await,
        };
        self.active.remove(&activation);

        let result = ActivationResult::conclude(activation, scene_id, outcomes);
        tracing::info!(
            scene = %scene_id,
            overall = ?result.overall,
            devices = result.outcomes.len(),
            "scene activation finished"
        );
        self.sink.notify(
            NotificationKind::SceneActivated,
            serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
        );
        Ok(result)
    }

    /// Cancel a running activation; stops further dispatch. Returns
    /// `false` when the activation is not in flight.
    pub fn cancel(&self, activation: ActivationId) -> bool {
        match self.active.get(&activation) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    async fn run_sequential(
        &self,
        scene: &Scene,
        cancelled: &AtomicBool,
    ) -> Vec<(nido_domain::id::DeviceId, DeviceOutcome)> {
        let mut outcomes = Vec::with_capacity(scene.entries.len());
        for entry in &scene.entries {
            if cancelled.load(Ordering::Relaxed) {
                outcomes.push((entry.device.clone(), DeviceOutcome::Cancelled));
                continue;
            }
            let outcome = match self
                .dispatcher
                .send(&entry.device, entry.changes.clone())
                .await
            {
                Ok(result) => DeviceOutcome::from(&result),
                Err(err) => DeviceOutcome::Failed {
                    reason: err.to_string(),
                },
            };
            let unrecoverable = !outcome.is_applied();
            outcomes.push((entry.device.clone(), outcome));
            if scene.strict && unrecoverable {
                tracing::warn!(
                    scene = %scene.id,
                    device = %entry.device,
                    "strict scene stopped at first unrecoverable failure"
                );
                break;
            }
        }
        outcomes
    }

    async fn run_parallel(
        &self,
        scene: &Scene,
        cancelled: &AtomicBool,
    ) -> Vec<(nido_domain::id::DeviceId, DeviceOutcome)> {
        let mut tasks = JoinSet::new();
        for (index, entry) in scene.entries.iter().enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                // Everything not yet dispatched is recorded as cancelled.
                let mut outcomes = tasks.join_all().await;
                for (offset, entry) in scene.entries[index..].iter().enumerate() {
                    outcomes.push((index + offset, entry.device.clone(), DeviceOutcome::Cancelled));
                }
                return finish_parallel(outcomes);
            }
            let dispatcher = self.dispatcher.clone();
            let device = entry.device.clone();
            let changes = entry.changes.clone();
            tasks.spawn(async move {
                let outcome = match dispatcher.send(&device, changes).await {
                    Ok(result) => DeviceOutcome::from(&result),
                    Err(err) => DeviceOutcome::Failed {
                        reason: err.to_string(),
                    },
                };
                (index, device, outcome)
            });
        }
        let outcomes = tasks.join_all().await;
        finish_parallel(outcomes)
    }
}

/// Restore the scene's listed order from the unordered join results.
fn finish_parallel(
    mut outcomes: Vec<(usize, nido_domain::id::DeviceId, DeviceOutcome)>,
) -> Vec<(nido_domain::id::DeviceId, DeviceOutcome)> {
    outcomes.sort_by_key(|(index, _, _)| *index);
    outcomes
        .into_iter()
        .map(|(_, device, outcome)| (device, outcome))
        .collect()
}
