/*!
Mock MQTT Client pour développement sans broker

Records every publish/subscribe so tests can assert on what a plugin sent,
and lets a test inject failures (publish refused, disconnect refused) or
slow publishes to observe ordering and concurrency.
*/

use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    /// Payload as UTF-8 (lossy), handy for `"ON"` / `"OFF"` assertions
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
    fail_publish: Arc<AtomicBool>,
    fail_disconnect: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    publish_delay_ms: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Every following publish fails (and is not recorded) while `fail` is true
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// `disconnect` still marks the client closed but returns an error
    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    /// Each publish sleeps this long before being recorded
    pub fn set_publish_delay(&self, delay: Duration) {
        self.publish_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.publish_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let outcome = if self.fail_publish.load(Ordering::SeqCst) {
            log::warn!("[MOCK] publish refused on {}", message.topic);
            Err(anyhow::anyhow!("publish refused on {}", message.topic))
        } else {
            log::info!("📤 [MOCK] Published to {}: {} bytes", message.topic, message.payload.len());
            self.published_messages.lock().unwrap().push(message);
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Simule l'abonnement à un topic (compatible avec AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().push((topic.clone(), qos));
        log::info!("📥 [MOCK] Subscribed to {}", topic);
        Ok(())
    }

    /// Simule la déconnexion du broker
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            anyhow::bail!("disconnect refused");
        }
        log::info!("[MOCK] Disconnected");
        Ok(())
    }

    /// Simule la réception d'un message (pour tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender.send(message.clone()).map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }

        log::info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Payloads (UTF-8) publiés sur un topic, dans l'ordre
    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.find_messages_by_topic(topic)
            .iter()
            .map(MockMessage::payload_str)
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Plus grand nombre de publish observés en même temps
    pub fn max_concurrent_publishes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}
