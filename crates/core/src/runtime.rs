//! Runtime — explicit lifecycle wiring of the core components.
//!
//! The runtime owns the "wait for next event, evaluate, dispatch" loop as
//! tasks consuming the event bus, not as callback chains. A router task
//! pulls events off the engine subscription, captures the registry
//! snapshot at intake, and shards events across N workers by source so
//! per-source ordering survives concurrent processing. Workers evaluate,
//! dispatch, then acknowledge.
//!
//! Shutdown is explicit: the router stops pulling, workers drain their
//! queues, and delayed actions that have not dispatched yet are dropped.
//! Unacknowledged events are redelivered from the cursor after restart.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use nido_domain::device::DeviceSnapshot;
use nido_domain::error::NidoError;
use nido_domain::event::{Event, EventPayload, EventType};
use nido_domain::rule::ActionTarget;
use nido_domain::time::now;

use crate::bus::EventBus;
use crate::dispatcher::CommandDispatcher;
use crate::engine::{PlannedAction, RuleEngine};
use crate::ports::adapter::DeviceAdapter;
use crate::ports::notification::{NotificationKind, NotificationSink};
use crate::ports::rules::{RuleRepository, SceneRepository};
use crate::ports::storage::CursorStore;
use crate::registry::DeviceRegistry;
use crate::scene::SceneExecutor;

/// Durable subscriber name of the rule-engine loop.
pub const ENGINE_SUBSCRIBER: &str = "rule-engine";

/// Tunables for the worker loops.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Concurrent evaluation workers. Events shard by source, so
    /// per-source ordering holds for any worker count.
    pub workers: usize,
    /// Per-worker channel capacity between router and worker.
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            channel_capacity: 64,
        }
    }
}

/// Wires registry, bus, engine, dispatcher and scene executor into
/// running worker loops with an explicit lifecycle.
pub struct Runtime<R, S, A, N, C> {
    registry: Arc<DeviceRegistry<Arc<EventBus<C>>>>,
    bus: Arc<EventBus<C>>,
    engine: Arc<RuleEngine<R, N>>,
    dispatcher: Arc<CommandDispatcher<A, Arc<EventBus<C>>, N>>,
    scenes: Arc<SceneExecutor<S, A, Arc<EventBus<C>>, N>>,
    sink: N,
    config: RuntimeConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl<R, S, A, N, C> Runtime<R, S, A, N, C>
where
    R: RuleRepository + Send + Sync + 'static,
    S: SceneRepository + Send + Sync + 'static,
    A: DeviceAdapter + Send + Sync + 'static,
    N: NotificationSink + Clone + Send + Sync + 'static,
    C: CursorStore + Send + Sync + 'static,
{
    /// Assemble a runtime from already-constructed components.
    pub fn new(
        registry: Arc<DeviceRegistry<Arc<EventBus<C>>>>,
        bus: Arc<EventBus<C>>,
        engine: Arc<RuleEngine<R, N>>,
        dispatcher: Arc<CommandDispatcher<A, Arc<EventBus<C>>, N>>,
        scenes: Arc<SceneExecutor<S, A, Arc<EventBus<C>>, N>>,
        sink: N,
        config: RuntimeConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            bus,
            engine,
            dispatcher,
            scenes,
            sink,
            config,
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// The registry handle, for composition roots and telemetry pumps.
    #[must_use]
    pub fn registry(&self) -> Arc<DeviceRegistry<Arc<EventBus<C>>>> {
        self.registry.clone()
    }

    /// The bus handle.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus<C>> {
        self.bus.clone()
    }

    /// The scene executor handle.
    #[must_use]
    pub fn scenes(&self) -> Arc<SceneExecutor<S, A, Arc<EventBus<C>>, N>> {
        self.scenes.clone()
    }

    /// Subscribe the engine loop and start the router and workers.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cursor store fails during
    /// subscription.
    pub async fn start(self: &Arc<Self>) -> Result<(), NidoError> {
        let subscription = Arc::new(
            self.bus
                .subscribe(
                    ENGINE_SUBSCRIBER,
                    vec![
                        EventType::TelemetryChanged,
                        EventType::TimerFired,
                        EventType::GeofenceEntered,
                        EventType::GeofenceExited,
                        EventType::VoiceCommandReceived,
                        EventType::SceneRequested,
                    ],
                )
                .await?,
        );

        let workers = self.config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut tasks = self.tasks.lock().expect("runtime tasks poisoned");

        for worker_index in 0..workers {
            let (tx, mut rx) = mpsc::channel::<(Event, DeviceSnapshot)>(self.config.channel_capacity);
            senders.push(tx);
            let runtime = self.clone();
            let subscription = subscription.clone();
            tasks.push(tokio::spawn(async move {
                while let Some((event, snapshot)) = rx.recv().await {
                    runtime.process(&event, &snapshot).await;
                    if let Err(err) = subscription.ack(&event).await {
                        tracing::warn!(worker = worker_index, error = %err, "failed to persist cursor");
                    }
                }
                tracing::debug!(worker = worker_index, "worker stopped");
            }));
        }

        let runtime = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    event = subscription.next() => {
                        let snapshot = runtime.registry.snapshot();
                        let shard = shard_for(&event, senders.len());
                        if senders[shard].send((event, snapshot)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("router stopped");
            // Dropping the senders lets the workers drain and stop.
        }));

        tracing::info!(workers, "runtime started");
        Ok(())
    }

    /// Stop pulling events, drain the workers, and join all tasks.
    /// In-flight dispatches complete; delayed actions that have not
    /// dispatched yet are dropped.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().expect("runtime tasks poisoned"));
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "task ended abnormally during shutdown");
            }
        }
        tracing::info!("runtime stopped");
    }

    async fn process(self: &Arc<Self>, event: &Event, snapshot: &DeviceSnapshot) {
        match self.engine.evaluate(event, snapshot, now()).await {
            Ok(evaluation) => {
                if evaluation.is_duplicate() {
                    // Redelivery: skip every effect, including direct
                    // scene requests.
                    return;
                }
                for action in evaluation.actions() {
                    self.execute(action).await;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "rule evaluation failed to load definitions");
            }
        }

        // Explicit scene requests bypass the rule set.
        if let EventPayload::SceneRequested { scene } = &event.payload {
            match self.scenes.activate(*scene).await {
                Ok(result) => {
                    tracing::debug!(scene = %scene, overall = ?result.overall, "requested scene finished");
                }
                Err(err) => {
                    tracing::warn!(scene = %scene, error = %err, "requested scene failed");
                }
            }
        }
    }

    async fn execute(self: &Arc<Self>, action: PlannedAction) {
        if let Some(delay) = action.delay_seconds {
            let runtime = self.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {
                        runtime.dispatch_now(action).await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!(rule = %action.rule, "delayed action dropped at shutdown");
                    }
                }
            });
            return;
        }
        self.dispatch_now(action).await;
    }

    async fn dispatch_now(self: &Arc<Self>, action: PlannedAction) {
        match action.target {
            ActionTarget::Device { ref device } => {
                match self.dispatcher.send(device, action.changes).await {
                    Ok(result) => {
                        tracing::debug!(rule = %action.rule, device = %device, status = %result.status, "action dispatched");
                    }
                    Err(err) => {
                        tracing::warn!(rule = %action.rule, device = %device, error = %err, "action dropped at dispatch");
                        self.sink.notify(
                            NotificationKind::ActionDropped,
                            serde_json::json!({
                                "rule": action.rule,
                                "device": device,
                                "reason": err.to_string(),
                            }),
                        );
                    }
                }
            }
            ActionTarget::Scene { scene } => match self.scenes.activate(scene).await {
                Ok(result) => {
                    tracing::debug!(rule = %action.rule, scene = %scene, overall = ?result.overall, "scene action finished");
                }
                Err(err) => {
                    tracing::warn!(rule = %action.rule, scene = %scene, error = %err, "scene action dropped");
                    self.sink.notify(
                        NotificationKind::ActionDropped,
                        serde_json::json!({
                            "rule": action.rule,
                            "scene": scene,
                            "reason": err.to_string(),
                        }),
                    );
                }
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn shard_for(event: &Event, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    event.source.key().hash(&mut hasher);
    (hasher.finish() as usize) % workers
}
