//! End-to-end smoke tests for the full nidod stack.
//!
//! Each test wires the complete application — JSON storage in a scratch
//! directory, the virtual adapter, real bus/registry/engine/dispatcher —
//! and drives it through the event loop, exactly as the daemon does.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nido_adapter_storage_json::{
    JsonCursorStore, JsonDeviceStateStore, JsonRuleRepository, JsonSceneRepository,
};
use nido_adapter_virtual::{Behavior, VirtualAdapter};
use nido_core::bus::{BusConfig, EventBus};
use nido_core::dispatcher::{CommandDispatcher, DispatcherConfig};
use nido_core::engine::RuleEngine;
use nido_core::notify::TracingNotificationSink;
use nido_core::ports::adapter::DeviceAdapter;
use nido_core::ports::event_bus::EventPublisher;
use nido_core::ports::rules::{RuleRepository, SceneRepository};
use nido_core::registry::DeviceRegistry;
use nido_core::runtime::{Runtime, RuntimeConfig};
use nido_core::scene::SceneExecutor;
use nido_domain::command::{ActivationOutcome, DeviceOutcome};
use nido_domain::device::{AttributeValue, Capability, Connectivity};
use nido_domain::event::{EventPayload, EventSource, EventType};
use nido_domain::id::DeviceId;
use nido_domain::rule::{Action, CompareOp, Condition, Operand, Rule, TriggerSpec};
use nido_domain::scene::{ActivationMode, Scene};

type Sink = Arc<TracingNotificationSink>;
type Bus = Arc<EventBus<JsonCursorStore>>;
type Stack = (
    Arc<Runtime<Arc<JsonRuleRepository>, Arc<JsonSceneRepository>, Arc<VirtualAdapter>, Sink, JsonCursorStore>>,
    Arc<VirtualAdapter>,
    Arc<JsonRuleRepository>,
    Arc<JsonSceneRepository>,
);

fn scratch_dir() -> PathBuf {
    std::env::temp_dir()
        .join("nidod-tests")
        .join(nido_domain::id::RuleId::new().to_string())
}

async fn wire(data_dir: &PathBuf) -> Stack {
    let rules = Arc::new(
        JsonRuleRepository::load(data_dir.join("rules.json"))
            .await
            .unwrap(),
    );
    let scenes_repo = Arc::new(
        JsonSceneRepository::load(data_dir.join("scenes.json"))
            .await
            .unwrap(),
    );
    let cursors = Arc::new(
        JsonCursorStore::load(data_dir.join("cursors.json"))
            .await
            .unwrap(),
    );
    let bus: Bus = Arc::new(EventBus::new(BusConfig::default(), cursors));

    let adapter = Arc::new(VirtualAdapter::demo());
    let registry = Arc::new(DeviceRegistry::new(bus.clone()));
    for device in adapter.discover().await.unwrap() {
        registry.register(device);
    }

    let sink: Sink = Arc::new(TracingNotificationSink);
    let dispatcher = Arc::new(CommandDispatcher::new(
        adapter.clone(),
        registry.clone(),
        sink.clone(),
        DispatcherConfig {
            max_retries: 2,
            command_timeout: Duration::from_millis(200),
            backoff_base: Duration::from_millis(1),
        },
    ));
    let scenes = Arc::new(SceneExecutor::new(
        scenes_repo.clone(),
        dispatcher.clone(),
        sink.clone(),
    ));
    let engine = Arc::new(RuleEngine::new(rules.clone(), sink.clone()));
    let runtime = Arc::new(Runtime::new(
        registry,
        bus,
        engine,
        dispatcher,
        scenes,
        sink,
        RuntimeConfig::default(),
    ));
    runtime.start().await.unwrap();

    // Pump adapter telemetry into the registry, as the daemon does.
    {
        let registry = runtime.registry();
        let mut feed = adapter.subscribe_telemetry();
        tokio::spawn(async move {
            while let Ok(update) = feed.recv().await {
                let _ = registry.apply_telemetry(update).await;
            }
        });
    }

    (runtime, adapter, rules, scenes_repo)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn power_on() -> HashMap<Capability, AttributeValue> {
    HashMap::from([(Capability::Power, AttributeValue::Bool(true))])
}

fn motion_rule(cooldown_seconds: u64) -> Rule {
    Rule::builder()
        .name("hallway-motion-light")
        .trigger(TriggerSpec::on(vec![EventType::TelemetryChanged]).from_device("virtual-motion-1"))
        .condition(Condition::Compare {
            device: "virtual-motion-1".into(),
            capability: Capability::Motion,
            op: CompareOp::Eq,
            operand: Operand::Literal {
                value: AttributeValue::Bool(true),
            },
        })
        .cooldown_seconds(cooldown_seconds)
        .action(Action::set_device("virtual-light-2", power_on()))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Telemetry → rule → command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_turn_on_light_when_motion_detected() {
    let dir = scratch_dir();
    let (runtime, adapter, rules, _) = wire(&dir).await;
    rules.create(motion_rule(0)).await.unwrap();

    adapter.push_telemetry(
        "virtual-motion-1",
        HashMap::from([(Capability::Motion, AttributeValue::Bool(true))]),
    );
    settle().await;
    runtime.shutdown().await;

    let sent = adapter.sent_commands();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.as_str(), "virtual-light-2");

    let light = runtime
        .registry()
        .get_state(&DeviceId::from("virtual-light-2"))
        .unwrap();
    assert_eq!(
        light.attribute(Capability::Power),
        Some(&AttributeValue::Bool(true))
    );
}

#[tokio::test]
async fn should_fire_once_under_event_storm_with_cooldown() {
    let dir = scratch_dir();
    let (runtime, adapter, rules, _) = wire(&dir).await;
    rules.create(motion_rule(3600)).await.unwrap();

    for _ in 0..5 {
        adapter.push_telemetry(
            "virtual-motion-1",
            HashMap::from([(Capability::Motion, AttributeValue::Bool(true))]),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    settle().await;
    runtime.shutdown().await;

    assert_eq!(adapter.sent_commands().len(), 1);
}

// ---------------------------------------------------------------------------
// Scenes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_partial_when_scene_device_times_out() {
    let dir = scratch_dir();
    let (runtime, adapter, _, scenes_repo) = wire(&dir).await;

    let scene = Scene::builder()
        .name("Evening")
        .entry("virtual-light-1", power_on())
        .entry("virtual-light-2", power_on())
        .mode(ActivationMode::Parallel)
        .build()
        .unwrap();
    let scene = scenes_repo.create(scene).await.unwrap();
    adapter.set_behavior(&DeviceId::from("virtual-light-2"), Behavior::AlwaysTimeout);

    let result = runtime.scenes().activate(scene.id).await.unwrap();
    runtime.shutdown().await;

    assert_eq!(result.overall, ActivationOutcome::Partial);
    assert_eq!(
        result.outcomes,
        vec![
            (DeviceId::from("virtual-light-1"), DeviceOutcome::Applied),
            (DeviceId::from("virtual-light-2"), DeviceOutcome::TimedOut),
        ]
    );
}

#[tokio::test]
async fn should_activate_scene_from_bus_request() {
    let dir = scratch_dir();
    let (runtime, adapter, _, scenes_repo) = wire(&dir).await;
    let scene = Scene::builder()
        .name("Evening")
        .entry("virtual-light-1", power_on())
        .build()
        .unwrap();
    let scene = scenes_repo.create(scene).await.unwrap();

    runtime
        .bus()
        .publish(
            EventPayload::SceneRequested { scene: scene.id },
            EventSource::User {
                user: "ana".to_string(),
            },
        )
        .await
        .unwrap();
    settle().await;
    runtime.shutdown().await;

    assert_eq!(adapter.sent_commands().len(), 1);
}

// ---------------------------------------------------------------------------
// Dispatcher failure path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_mark_device_unreachable_after_exhausted_retries() {
    let dir = scratch_dir();
    let (runtime, adapter, rules, _) = wire(&dir).await;
    rules.create(motion_rule(0)).await.unwrap();
    adapter.set_behavior(&DeviceId::from("virtual-light-2"), Behavior::AlwaysTimeout);

    adapter.push_telemetry(
        "virtual-motion-1",
        HashMap::from([(Capability::Motion, AttributeValue::Bool(true))]),
    );
    settle().await;
    runtime.shutdown().await;

    let light = runtime
        .registry()
        .get_state(&DeviceId::from("virtual-light-2"))
        .unwrap();
    assert_eq!(light.connectivity, Connectivity::Unreachable);
    // Last-known-good state untouched by the failure.
    assert!(light.attribute(Capability::Power).is_none());
}

// ---------------------------------------------------------------------------
// Restart durability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_persist_definitions_and_cursors_across_restart() {
    let dir = scratch_dir();
    let rule_id = {
        let (runtime, adapter, rules, _) = wire(&dir).await;
        let rule = rules.create(motion_rule(0)).await.unwrap();
        adapter.push_telemetry(
            "virtual-motion-1",
            HashMap::from([(Capability::Motion, AttributeValue::Bool(true))]),
        );
        settle().await;
        runtime.shutdown().await;
        rule.id
    };

    // Restart: definitions and last_fired survive, and a fresh event
    // still reaches the rule (sequences continue above the cursor).
    let (runtime, adapter, rules, _) = wire(&dir).await;
    let stored = rules.get_by_id(rule_id).await.unwrap().unwrap();
    assert!(stored.last_fired.is_some());

    adapter.push_telemetry(
        "virtual-motion-1",
        HashMap::from([(Capability::Motion, AttributeValue::Bool(true))]),
    );
    settle().await;
    runtime.shutdown().await;
    assert_eq!(adapter.sent_commands().len(), 1);
}
