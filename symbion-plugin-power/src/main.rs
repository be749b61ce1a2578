/**
 * SYMBION PLUGIN POWER - Pilotage de l'alimentation des PCs via MQTT
 *
 * RÔLE : Chaque PC du fichier de config devient un switch Home Assistant.
 * ON -> Wake-on-LAN, OFF -> extinction/veille SSH, état = résultat du ping.
 *
 * DÉMARRAGE : env -> logs -> fichier PCs -> pings initiaux -> MQTT -> file
 * d'envoi -> manager -> availability -> /health.
 * ARRÊT (SIGINT/SIGTERM/SIGQUIT) : pings, offline, vidage de la file, HTTP.
 */

mod alive;
mod availability;
mod config;
mod debounce;
mod error;
mod health;
mod manager;
mod models;
mod mqtt;
mod payload;
mod power;
mod signals;
mod ssh;
mod topic;
mod wol;

#[cfg(test)]
mod testing;

use crate::alive::{AliveMonitor, PingProber, Prober};
use crate::availability::Availability;
use crate::config::{load_devices, Settings};
use crate::health::HealthState;
use crate::manager::{availability_topics, command_topics, DeviceManager, ManagedEntity, ManagerSettings};
use crate::mqtt::TaskQueue;
use crate::power::RemotePower;
use crate::topic::Topics;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Un moniteur par PC, démarrés en parallèle (le premier ping de chacun est attendu).
async fn start_monitors(
    entities: &[crate::models::Entity],
    settings: &Settings,
) -> Result<Vec<ManagedEntity>> {
    let prober: Arc<dyn Prober> = Arc::new(PingProber);
    let mut set = JoinSet::new();
    for (index, entity) in entities.iter().enumerate() {
        let address = entity.remote.ip_address.clone();
        let interval = settings.check_alive_interval;
        let prober = Arc::clone(&prober);
        set.spawn(async move { (index, AliveMonitor::start(address, interval, prober).await) });
    }

    let mut monitors: Vec<Option<AliveMonitor>> = entities.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let (index, monitor) = joined.context("liveness monitor start-up panicked")?;
        monitors[index] = Some(monitor);
    }

    entities
        .iter()
        .zip(monitors)
        .map(|(entity, monitor)| {
            let monitor = monitor.with_context(|| format!("no monitor for {}", entity.id))?;
            info!(entity = %entity.id, address = %monitor.address(), alive = monitor.last_alive(), "monitor started");
            Ok(ManagedEntity {
                entity: entity.clone(),
                alive: Arc::new(monitor),
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("invalid configuration")?;
    init_tracing(&settings.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "symbion-plugin-power starting");

    let devices = load_devices(&settings.devices_path)
        .await
        .context("failed to load device file")?;
    info!(device = %devices.device_id, entities = devices.entities.len(), "device file loaded");

    let topics = Topics::new(settings.namespace.clone(), devices.device_id.clone());
    let managed = start_monitors(&devices.entities, &settings).await?;

    // MQTT : CONNECT + SUBSCRIBE avant toute file
    let subscriptions = command_topics(&topics, &devices.entities);
    let (client, eventloop) = mqtt::connect(&settings.mqtt, &subscriptions, settings.entity_qos)
        .await
        .with_context(|| {
            format!(
                "failed to connect to mqtt://{}:{}",
                settings.mqtt.broker_host, settings.mqtt.broker_port
            )
        })?;

    let queue = Arc::new(TaskQueue::start(Arc::new(client), settings.task_interval));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let event_loop = mqtt::spawn_event_loop(
        eventloop,
        inbound_tx,
        Arc::clone(&queue),
        subscriptions,
        settings.entity_qos,
    );

    let manager = Arc::new(DeviceManager::new(
        topics.clone(),
        managed,
        Arc::clone(&queue),
        Arc::new(RemotePower),
        ManagerSettings {
            discovery_prefix: settings.discovery_prefix.clone(),
            entity_qos: settings.entity_qos,
            state_change_pause: settings.state_change_pause,
        },
    ));
    manager.setup();

    let commands = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_commands(inbound_rx).await })
    };

    let availability = Availability::start(
        availability_topics(&topics, &devices.entities),
        Arc::clone(&queue),
        settings.availability_interval,
    );
    availability.push_online();

    let listener = health::bind(settings.http_port)
        .await
        .with_context(|| format!("failed to bind health endpoint on port {}", settings.http_port))?;
    let (http_stop_tx, http_stop_rx) = oneshot::channel::<()>();
    let http = tokio::spawn(health::serve(
        listener,
        HealthState::new(manager.entity_count(), Arc::clone(&queue)),
        async move {
            let _ = http_stop_rx.await;
        },
    ));

    info!("running");
    match signals::wait_for_shutdown_signal().await {
        Ok(signal) => info!(signal, "shutdown requested"),
        Err(e) => error!(error = %e, "cannot listen for shutdown signals, stopping"),
    }

    manager.close();
    availability.close();
    if let Err(e) = queue.close(true).await {
        warn!(error = %e, "mqtt disconnect failed");
    }
    event_loop.abort();
    commands.abort();

    let _ = http_stop_tx.send(());
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health endpoint stopped with an error"),
        Err(e) => warn!(error = %e, "health endpoint task failed"),
    }

    info!("stopped");
    Ok(())
}
