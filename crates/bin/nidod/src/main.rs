//! # nidod — nido daemon
//!
//! Composition root that wires persistence, adapters and the
//! orchestration core together and runs the event loop.
//!
//! ## Responsibilities
//! - Parse configuration (TOML file, env vars)
//! - Load persisted rules, scenes, device state and bus cursors
//! - Construct the bus, registry, engine, dispatcher, scene executor and
//!   scheduler, injecting adapters via port traits
//! - Pump adapter telemetry into the registry and persist device state
//! - Handle graceful shutdown (SIGINT) with in-flight commands drained
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use nido_adapter_storage_json::{
    JsonCursorStore, JsonDeviceStateStore, JsonRuleRepository, JsonSceneRepository,
};
use nido_adapter_virtual::VirtualAdapter;
use nido_core::bus::{BusConfig, EventBus};
use nido_core::dispatcher::{CommandDispatcher, DispatcherConfig};
use nido_core::engine::RuleEngine;
use nido_core::notify::TracingNotificationSink;
use nido_core::ports::adapter::DeviceAdapter;
use nido_core::ports::rules::{RuleRepository, SceneRepository};
use nido_core::ports::storage::DeviceStateStore;
use nido_core::registry::DeviceRegistry;
use nido_core::runtime::{Runtime, RuntimeConfig};
use nido_core::scene::SceneExecutor;
use nido_core::scheduler::{Location, Scheduler};
use nido_domain::device::{AttributeValue, Capability};
use nido_domain::event::EventType;
use nido_domain::rule::{
    Action, CompareOp, Condition, Operand, Rule, ScheduleSpec, SunEvent, TriggerSpec,
};
use nido_domain::scene::{ActivationMode, Scene};

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let data_dir = PathBuf::from(&config.storage.data_dir);
    let rules = Arc::new(JsonRuleRepository::load(data_dir.join("rules.json")).await?);
    let scenes_repo = Arc::new(JsonSceneRepository::load(data_dir.join("scenes.json")).await?);
    let cursors = Arc::new(JsonCursorStore::load(data_dir.join("cursors.json")).await?);
    let device_store = Arc::new(JsonDeviceStateStore::new(data_dir.join("devices.json")));

    let bus = Arc::new(EventBus::new(
        BusConfig {
            retention: config.bus.retention,
            queue_bound: config.bus.queue_bound,
        },
        cursors,
    ));
    let registry = Arc::new(DeviceRegistry::restore(
        bus.clone(),
        device_store.load_all().await?,
    ));

    let adapter = if config.integrations.virtual_enabled {
        Arc::new(VirtualAdapter::demo())
    } else {
        Arc::new(VirtualAdapter::new())
    };
    for device in adapter
        .discover()
        .await
        .map_err(|err| anyhow::anyhow!("discovery failed: {err}"))?
    {
        registry.register(device);
    }
    if config.integrations.virtual_enabled {
        seed_demo_definitions(&rules, &scenes_repo).await?;
    }

    let sink = Arc::new(TracingNotificationSink);
    let dispatcher = Arc::new(CommandDispatcher::new(
        adapter.clone(),
        registry.clone(),
        sink.clone(),
        DispatcherConfig {
            max_retries: config.dispatcher.max_retries,
            command_timeout: Duration::from_millis(config.dispatcher.command_timeout_ms),
            backoff_base: Duration::from_millis(config.dispatcher.backoff_base_ms),
        },
    ));
    let scenes = Arc::new(SceneExecutor::new(
        scenes_repo.clone(),
        dispatcher.clone(),
        sink.clone(),
    ));
    let engine = Arc::new(RuleEngine::new(rules.clone(), sink.clone()));

    let runtime = Arc::new(Runtime::new(
        registry.clone(),
        bus.clone(),
        engine,
        dispatcher,
        scenes,
        sink,
        RuntimeConfig {
            workers: config.engine.workers,
            ..RuntimeConfig::default()
        },
    ));
    runtime.start().await?;

    let scheduler = Scheduler::new(
        rules.clone(),
        bus.clone(),
        Location {
            latitude: config.location.latitude,
            longitude: config.location.longitude,
        },
    );
    scheduler.start().await?;

    // Pump adapter telemetry into the registry.
    let pump = {
        let registry = registry.clone();
        let mut feed = adapter.subscribe_telemetry();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(update) => {
                        if let Err(err) = registry.apply_telemetry(update).await {
                            tracing::warn!(error = %err, "telemetry rejected");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "telemetry feed lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    // Persist device state whenever it changes.
    let persistence = {
        let registry = registry.clone();
        let device_store = device_store.clone();
        let subscription = bus
            .subscribe("device-persistence", vec![EventType::TelemetryChanged])
            .await?;
        tokio::spawn(async move {
            loop {
                let event = subscription.next().await;
                let devices: Vec<_> = registry.snapshot().into_values().collect();
                if let Err(err) = device_store.save_all(&devices).await {
                    tracing::warn!(error = %err, "failed to persist device state");
                }
                if let Err(err) = subscription.ack(&event).await {
                    tracing::warn!(error = %err, "failed to persist cursor");
                }
            }
        })
    };

    tracing::info!(
        devices = registry.len(),
        timers = scheduler.active_count(),
        "nidod running, press ctrl-c to stop"
    );
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    scheduler.shutdown();
    runtime.shutdown().await;
    pump.abort();
    persistence.abort();
    let devices: Vec<_> = registry.snapshot().into_values().collect();
    device_store.save_all(&devices).await?;

    Ok(())
}

/// Seed the canonical demo rules and scenes on first start.
async fn seed_demo_definitions(
    rules: &Arc<JsonRuleRepository>,
    scenes: &Arc<JsonSceneRepository>,
) -> anyhow::Result<()> {
    if !scenes.get_all().await?.is_empty() || !rules.get_all().await?.is_empty() {
        return Ok(());
    }
    tracing::info!("seeding demo rules and scenes");

    let good_morning = Scene::builder()
        .name("Good morning")
        .entry(
            "virtual-light-1",
            HashMap::from([
                (Capability::Power, AttributeValue::Bool(true)),
                (Capability::Brightness, AttributeValue::Int(50)),
            ]),
        )
        .entry(
            "virtual-light-2",
            HashMap::from([
                (Capability::Power, AttributeValue::Bool(true)),
                (Capability::Brightness, AttributeValue::Int(50)),
            ]),
        )
        .entry(
            "virtual-thermostat-1",
            HashMap::from([(Capability::TargetTemp, AttributeValue::Float(22.0))]),
        )
        .mode(ActivationMode::Parallel)
        .build()?;
    let good_night = Scene::builder()
        .name("Good night")
        .entry(
            "virtual-light-1",
            HashMap::from([(Capability::Power, AttributeValue::Bool(false))]),
        )
        .entry(
            "virtual-light-2",
            HashMap::from([(Capability::Power, AttributeValue::Bool(false))]),
        )
        .entry(
            "virtual-lock-1",
            HashMap::from([(
                Capability::LockState,
                AttributeValue::String("locked".to_string()),
            )]),
        )
        .entry(
            "virtual-thermostat-1",
            HashMap::from([(Capability::TargetTemp, AttributeValue::Float(18.0))]),
        )
        .build()?;
    let away = Scene::builder()
        .name("Away")
        .entry(
            "virtual-lock-1",
            HashMap::from([(
                Capability::LockState,
                AttributeValue::String("locked".to_string()),
            )]),
        )
        .entry(
            "virtual-light-1",
            HashMap::from([(Capability::Power, AttributeValue::Bool(false))]),
        )
        .entry(
            "virtual-light-2",
            HashMap::from([(Capability::Power, AttributeValue::Bool(false))]),
        )
        .entry(
            "virtual-thermostat-1",
            HashMap::from([(Capability::TargetTemp, AttributeValue::Float(15.0))]),
        )
        .strict(true)
        .build()?;
    scenes.create(good_morning).await?;
    scenes.create(good_night).await?;
    scenes.create(away).await?;

    let lights_at_sunset = Rule::builder()
        .name("lights-at-sunset")
        .trigger(TriggerSpec::on(vec![EventType::TimerFired]))
        .schedule(ScheduleSpec::Sun {
            event: SunEvent::Sunset,
            offset_minutes: -15,
        })
        .condition(Condition::Compare {
            device: "virtual-home-mode".into(),
            capability: Capability::Presence,
            op: CompareOp::Ne,
            operand: Operand::Literal {
                value: AttributeValue::String("away".to_string()),
            },
        })
        .action(Action::set_device(
            "virtual-light-1",
            HashMap::from([(Capability::Power, AttributeValue::Bool(true))]),
        ))
        .build()?;
    let motion_light = Rule::builder()
        .name("hallway-motion-light")
        .trigger(
            TriggerSpec::on(vec![EventType::TelemetryChanged]).from_device("virtual-motion-1"),
        )
        .condition(Condition::Compare {
            device: "virtual-motion-1".into(),
            capability: Capability::Motion,
            op: CompareOp::Eq,
            operand: Operand::Literal {
                value: AttributeValue::Bool(true),
            },
        })
        .cooldown_seconds(30)
        .action(Action::set_device(
            "virtual-light-2",
            HashMap::from([(Capability::Power, AttributeValue::Bool(true))]),
        ))
        .build()?;
    rules.create(lights_at_sunset).await?;
    rules.create(motion_light).await?;
    Ok(())
}
