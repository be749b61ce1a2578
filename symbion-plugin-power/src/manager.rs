/**
 * DEVICE MANAGER - Réconciliation entre l'état réel des PCs et Home Assistant
 *
 * RÔLE :
 * - Publie pour chaque PC l'état initial et le document de discovery
 * - Relaie chaque tick de ping vers le topic state, sauf pendant la pause
 *   qui suit une commande (le PC met du temps à démarrer / s'éteindre)
 * - Transforme les commandes ON/OFF en Wake-on-LAN / extinction SSH, seulement
 *   quand l'état courant est différent de l'état demandé
 *
 * All bus writes go through the `TaskQueue`; power actions run in their own
 * tasks and only ever log their failures.
 */

use crate::alive::AliveMonitor;
use crate::debounce::DebounceTracker;
use crate::models::Entity;
use crate::mqtt::{InboundMessage, TaskQueue};
use crate::payload::{build_discovery, StatusMessage};
use crate::power::PowerActions;
use crate::topic::{TopicKind, Topics};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub discovery_prefix: String,
    pub entity_qos: QoS,
    pub state_change_pause: Duration,
}

/// Un PC et son moniteur de ping.
pub struct ManagedEntity {
    pub entity: Entity,
    pub alive: Arc<AliveMonitor>,
}

/// Command topics to subscribe before the manager exists.
pub fn command_topics(topics: &Topics, entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .map(|e| topics.entity(&e.id, TopicKind::Command))
        .collect()
}

pub fn availability_topics(topics: &Topics, entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .map(|e| topics.entity(&e.id, TopicKind::Availability))
        .collect()
}

// Liveness listener of one entity.
struct StateReporter {
    entity_id: String,
    state_topic: String,
    pause: Duration,
    debounce: DebounceTracker,
    queue: Arc<TaskQueue>,
}

impl StateReporter {
    fn report(&self, alive: bool) {
        if self.debounce.should_suppress(&self.entity_id, self.pause) {
            debug!(entity = %self.entity_id, alive, "state change paused after command");
            return;
        }
        self.queue.publish(
            self.state_topic.clone(),
            StatusMessage::from_alive(alive).as_str(),
            QoS::AtMostOnce,
            false,
        );
    }
}

pub struct DeviceManager {
    topics: Topics,
    entities: Vec<ManagedEntity>,
    queue: Arc<TaskQueue>,
    power: Arc<dyn PowerActions>,
    debounce: DebounceTracker,
    settings: ManagerSettings,
}

impl DeviceManager {
    pub fn new(
        topics: Topics,
        entities: Vec<ManagedEntity>,
        queue: Arc<TaskQueue>,
        power: Arc<dyn PowerActions>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            topics,
            entities,
            queue,
            power,
            debounce: DebounceTracker::new(),
            settings,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Registers the liveness listeners and queues initial state + discovery.
    pub fn setup(&self) {
        for managed in &self.entities {
            let id = &managed.entity.id;
            let state_topic = self.topics.entity(id, TopicKind::State);

            let reporter = StateReporter {
                entity_id: id.clone(),
                state_topic: state_topic.clone(),
                pause: self.settings.state_change_pause,
                debounce: self.debounce.clone(),
                queue: Arc::clone(&self.queue),
            };
            managed.alive.add_listener(move |alive| reporter.report(alive));

            let initial = StatusMessage::from_alive(managed.alive.last_alive());
            self.queue.publish(state_topic, initial.as_str(), QoS::AtMostOnce, false);

            let discovery = build_discovery(&self.topics, &managed.entity, self.settings.entity_qos);
            match serde_json::to_string(&discovery) {
                Ok(json) => self.queue.publish(
                    self.topics.discovery(&self.settings.discovery_prefix, id),
                    json,
                    QoS::AtLeastOnce,
                    true,
                ),
                Err(e) => error!(entity = %id, error = %e, "cannot serialize discovery payload"),
            }

            info!(entity = %id, initial = initial.as_str(), "entity ready");
        }
    }

    /// Applies one inbound message.
    ///
    /// Returns the spawned power action, if the message triggered one.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<JoinHandle<()>> {
        let Some(entity_id) = self.topics.command_entity(topic) else {
            debug!(topic = %topic, "not a command topic");
            return None;
        };
        let Some(managed) = self.entities.iter().find(|m| m.entity.id == entity_id) else {
            debug!(topic = %topic, "no entity for command");
            return None;
        };
        let command = match std::str::from_utf8(payload).map(str::parse::<StatusMessage>) {
            Ok(Ok(command)) => command,
            _ => {
                debug!(entity = %entity_id, payload = %String::from_utf8_lossy(payload), "ignoring payload");
                return None;
            }
        };

        let alive = managed.alive.last_alive();
        match (command, alive) {
            (StatusMessage::On, false) => Some(self.dispatch(managed, command)),
            (StatusMessage::Off, true) => Some(self.dispatch(managed, command)),
            _ => {
                debug!(entity = %entity_id, command = command.as_str(), alive, "already in requested state");
                None
            }
        }
    }

    fn dispatch(&self, managed: &ManagedEntity, command: StatusMessage) -> JoinHandle<()> {
        let entity_id = managed.entity.id.clone();
        self.debounce.mark_command_issued(&entity_id);
        info!(entity = %entity_id, command = command.as_str(), "power command");

        let power = Arc::clone(&self.power);
        let remote = managed.entity.remote.clone();
        tokio::spawn(async move {
            let result = match command {
                StatusMessage::On => power.wake(&remote).await,
                StatusMessage::Off => power.power_off(&remote).await,
            };
            if let Err(e) = result {
                error!(entity = %entity_id, command = command.as_str(), error = %e, "power action failed");
            }
        })
    }

    /// Consumes inbound messages until the channel closes.
    pub async fn run_commands(&self, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle_message(&message.topic, &message.payload);
        }
        debug!("inbound channel closed");
    }

    pub fn close(&self) {
        for managed in &self.entities {
            managed.alive.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DiscoveryPayload;
    use crate::testing::{entity, FakeProber, PowerCall, RecordingPower};
    use symbion_devkit::{MockMqttClient, TestHarness};

    const PAUSE: Duration = Duration::from_millis(30_000);
    const POLL: Duration = Duration::from_millis(10);

    struct Fixture {
        harness: TestHarness,
        prober: Arc<FakeProber>,
        power: Arc<RecordingPower>,
        queue: Arc<TaskQueue>,
        manager: DeviceManager,
        topics: Topics,
    }

    async fn fixture(alive: bool, power: Arc<RecordingPower>) -> Fixture {
        let harness = TestHarness::new();
        let prober = FakeProber::new(alive);
        let monitor = AliveMonitor::start("192.168.1.20", POLL, prober.clone()).await;
        let queue = Arc::new(TaskQueue::start(
            Arc::new(harness.mqtt_client.clone()),
            Duration::from_millis(1),
        ));
        let topics = Topics::new("symbion-power", "office");
        let manager = DeviceManager::new(
            topics.clone(),
            vec![ManagedEntity {
                entity: entity("pc1"),
                alive: Arc::new(monitor),
            }],
            Arc::clone(&queue),
            power.clone(),
            ManagerSettings {
                discovery_prefix: "homeassistant".into(),
                entity_qos: QoS::AtLeastOnce,
                state_change_pause: PAUSE,
            },
        );
        manager.setup();
        Fixture { harness, prober, power, queue, manager, topics }
    }

    impl Fixture {
        fn mock(&self) -> &MockMqttClient {
            &self.harness.mqtt_client
        }

        fn state_topic(&self) -> String {
            self.topics.entity("pc1", TopicKind::State)
        }

        fn command(&self, payload: &str) -> Option<JoinHandle<()>> {
            let topic = self.topics.entity("pc1", TopicKind::Command);
            self.manager.handle_message(&topic, payload.as_bytes())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_matches_first_probe() {
        for alive in [true, false] {
            let fx = fixture(alive, RecordingPower::new()).await;
            let expected = StatusMessage::from_alive(alive).as_str();
            let payloads = fx.harness.wait_for_payloads(&fx.state_topic(), 1, 50).await.unwrap();
            assert_eq!(payloads[0], expected);
            fx.manager.close();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_published_once_retained() {
        let fx = fixture(true, RecordingPower::new()).await;
        let topic = "homeassistant/switch/symbion-power_office_pc1/config";
        fx.harness.wait_for_payloads(topic, 1, 50).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let sent = fx.mock().find_messages_by_topic(topic);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].retain);
        assert_eq!(sent[0].qos, QoS::AtLeastOnce);
        let doc: DiscoveryPayload = fx.mock().get_last_json_message(topic).unwrap().unwrap();
        assert_eq!(doc.command_topic, "symbion-power/office/pc1/set");
        fx.harness
            .assert_field_equals(topic, "unique_id", &serde_json::json!("symbion-power_office_pc1"))
            .unwrap();
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_republish_state_without_command() {
        let fx = fixture(false, RecordingPower::new()).await;
        let payloads = fx.harness.wait_for_payloads(&fx.state_topic(), 4, 100).await.unwrap();
        assert!(payloads.iter().all(|p| p == "OFF"));
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_dead_host_wakes_and_pauses_state() {
        let fx = fixture(false, RecordingPower::new()).await;
        fx.harness.wait_for_payloads(&fx.state_topic(), 1, 50).await.unwrap();

        let action = fx.command("ON").expect("wake dispatched");
        action.await.unwrap();
        assert_eq!(fx.power.calls(), vec![PowerCall::Wake]);

        fx.prober.set_alive(true);
        let before = fx.mock().payloads_for(&fx.state_topic()).len();

        tokio::time::sleep(Duration::from_millis(29_995)).await;
        let paused: Vec<String> = fx.mock().payloads_for(&fx.state_topic());
        assert!(!paused.iter().any(|p| p == "ON"), "ON published inside the pause");
        assert!(paused.len() <= before + 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fx.mock().payloads_for(&fx.state_topic()).iter().any(|p| p == "ON"));
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_live_host_powers_off() {
        let fx = fixture(true, RecordingPower::new()).await;
        fx.command("OFF").expect("power off dispatched").await.unwrap();
        assert_eq!(fx.power.calls(), vec![PowerCall::Shutdown]);
        assert!(fx.manager.debounce.should_suppress("pc1", PAUSE));
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_commands_are_ignored() {
        let live = fixture(true, RecordingPower::new()).await;
        assert!(live.command("ON").is_none());
        assert!(live.power.calls().is_empty());
        assert!(!live.manager.debounce.should_suppress("pc1", PAUSE));
        live.manager.close();

        let dead = fixture(false, RecordingPower::new()).await;
        assert!(dead.command("OFF").is_none());
        assert!(dead.power.calls().is_empty());
        dead.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unroutable_messages_are_ignored() {
        let fx = fixture(false, RecordingPower::new()).await;
        assert!(fx.command("TOGGLE").is_none());
        assert!(fx.command("on").is_none());
        assert!(fx.manager.handle_message("symbion-power/office/pc2/set", b"ON").is_none());
        assert!(fx.manager.handle_message("symbion-power/office/pc1/state", b"ON").is_none());
        assert!(fx.manager.handle_message("other/office/pc1/set", b"ON").is_none());
        assert!(fx.manager.handle_message(&fx.topics.entity("pc1", TopicKind::Command), &[0xff, 0xfe]).is_none());
        assert!(fx.power.calls().is_empty());
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_power_action_is_contained() {
        let fx = fixture(false, RecordingPower::failing()).await;
        fx.command("ON").expect("wake dispatched").await.unwrap();
        assert_eq!(fx.power.calls(), vec![PowerCall::Wake]);
        assert!(fx.manager.debounce.should_suppress("pc1", PAUSE));

        fx.manager.close();
        fx.queue.close(true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_commands_reads_broker_messages_in_order() {
        let fx = fixture(false, RecordingPower::new()).await;
        let mut broker_rx = fx.mock().setup_receiver();
        let command_topic = fx.topics.entity("pc1", TopicKind::Command);
        fx.mock().simulate_incoming(command_topic.clone(), "ON").await.unwrap();
        fx.mock().simulate_incoming("symbion-power/office/pc9/set", "ON").await.unwrap();
        // already marked, still dead: a second ON wakes again
        fx.mock().simulate_incoming(command_topic, "ON").await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            let message = broker_rx.recv().await.unwrap();
            tx.send(InboundMessage::from(message)).unwrap();
        }
        drop(tx);

        fx.manager.run_commands(rx).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fx.power.calls(), vec![PowerCall::Wake, PowerCall::Wake]);
        fx.manager.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_state_reports() {
        let fx = fixture(true, RecordingPower::new()).await;
        fx.manager.close();
        fx.queue.close(true).await.unwrap();
        let count = fx.mock().payloads_for(&fx.state_topic()).len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.mock().payloads_for(&fx.state_topic()).len(), count);
    }

    #[test]
    fn test_topic_lists() {
        let topics = Topics::new("ns", "dev");
        let entities = vec![entity("a"), entity("b")];
        assert_eq!(command_topics(&topics, &entities), vec!["ns/dev/a/set", "ns/dev/b/set"]);
        assert_eq!(
            availability_topics(&topics, &entities),
            vec!["ns/dev/a/availability", "ns/dev/b/availability"]
        );
    }
}
