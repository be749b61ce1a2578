/**
 * MQTT - Connexion au broker et file d'envoi ordonnée
 *
 * RÔLE :
 * - `connect` : CONNECT + SUBSCRIBE initiaux, fatals en cas d'échec
 * - `spawn_event_loop` : poll rumqttc, remonte les PUBLISH entrants sur un channel
 * - `TaskQueue` : toute écriture vers le broker passe par une seule file FIFO,
 *   consommée une tâche à la fois, avec arrêt immédiat ou après vidage
 *
 * Producers (ping listeners, availability timer, reconnect handling) never
 * touch the client directly, so the broker sees publishes in enqueue order.
 */

use crate::config::MqttSettings;
use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Write side of the broker connection.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError>;
    async fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> Result<(), BusError>;
    async fn disconnect(&self) -> Result<(), BusError>;
}

#[async_trait]
impl BusClient for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        AsyncClient::subscribe(self, topic, qos).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> Result<(), BusError> {
        AsyncClient::publish(self, topic, qos, retain, payload.as_bytes().to_vec()).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        AsyncClient::disconnect(self).await?;
        Ok(())
    }
}

/// Opération MQTT différée, arguments figés à l'enqueue.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundTask {
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
}

impl OutboundTask {
    pub fn topic(&self) -> &str {
        match self {
            OutboundTask::Publish { topic, .. } | OutboundTask::Subscribe { topic, .. } => topic,
        }
    }

    async fn execute(&self, bus: &dyn BusClient) -> Result<(), BusError> {
        match self {
            OutboundTask::Publish { topic, payload, qos, retain } => {
                bus.publish(topic, payload, *qos, *retain).await
            }
            OutboundTask::Subscribe { topic, qos } => bus.subscribe(topic, *qos).await,
        }
    }
}

struct QueueInner {
    tasks: Mutex<VecDeque<OutboundTask>>,
    running: AtomicBool,
    bus: Arc<dyn BusClient>,
    pacing: Duration,
}

/// File FIFO mono-consommateur devant le client MQTT.
pub struct TaskQueue {
    inner: Arc<QueueInner>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TaskQueue {
    /// Spawns the consumer; must be called inside a tokio runtime.
    pub fn start(bus: Arc<dyn BusClient>, pacing: Duration) -> Self {
        let inner = Arc::new(QueueInner {
            tasks: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(true),
            bus,
            pacing,
        });
        let consumer = tokio::spawn(consume(Arc::clone(&inner)));

        Self {
            inner,
            consumer: Mutex::new(Some(consumer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends to the tail and returns; ignored once `close` has started.
    pub fn enqueue(&self, task: OutboundTask) {
        if self.closed.load(Ordering::Acquire) {
            debug!(topic = %task.topic(), "task queue closed, dropping task");
            return;
        }
        self.inner.tasks.lock().push_back(task);
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<String>, qos: QoS, retain: bool) {
        self.enqueue(OutboundTask::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        });
    }

    pub fn add_subscribe(&self, topic: impl Into<String>, qos: QoS) {
        self.enqueue(OutboundTask::Subscribe { topic: topic.into(), qos });
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the consumer then disconnects the bus.
    ///
    /// With `drain` the call first waits for every queued task to run; without
    /// it, whatever is still queued is left there and never executed. Only the
    /// first call has an effect.
    pub async fn close(&self, drain: bool) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if drain {
            info!(pending = self.len(), "[MQTT] waiting for taskQueue to empty...");
            while !self.is_empty() && !self.consumer_finished() {
                sleep(self.inner.pacing).await;
            }
            info!("[MQTT] taskQueue is empty");
        }

        self.inner.running.store(false, Ordering::Release);
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                warn!(error = %e, "[MQTT] task consumer ended abnormally");
            }
        }
        info!(left = self.len(), "[MQTT] task stopped");

        self.inner.bus.disconnect().await?;
        info!("[MQTT] closed");
        Ok(())
    }

    fn consumer_finished(&self) -> bool {
        self.consumer.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }
}

async fn consume(inner: Arc<QueueInner>) {
    while inner.running.load(Ordering::Acquire) {
        let next = inner.tasks.lock().pop_front();
        if let Some(task) = next {
            trace!(topic = %task.topic(), "[MQTT] running task");
            if let Err(e) = task.execute(inner.bus.as_ref()).await {
                error!(topic = %task.topic(), error = %e, "[MQTT] task failed");
            }
        }
        sleep(inner.pacing).await;
    }
}

/// Message reçu du broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// CONNECT puis SUBSCRIBE sur `topics`; rend la main une fois le SUBACK reçu.
pub async fn connect(
    settings: &MqttSettings,
    topics: &[String],
    qos: QoS,
) -> Result<(AsyncClient, EventLoop), BusError> {
    let client_id = format!("symbion-plugin-power-{}", Uuid::new_v4().simple());
    let mut opts = MqttOptions::new(client_id, &settings.broker_host, settings.broker_port);
    opts.set_keep_alive(KEEP_ALIVE);
    if let Some(username) = &settings.username {
        opts.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }

    let (client, mut eventloop) = AsyncClient::new(opts, CHANNEL_CAPACITY);
    if !topics.is_empty() {
        client
            .subscribe_many(topics.iter().map(|t| SubscribeFilter::new(t.clone(), qos)))
            .await?;
    }

    timeout(CONNECT_TIMEOUT, handshake(&mut eventloop, topics))
        .await
        .map_err(|_| BusError::Timeout(CONNECT_TIMEOUT))??;

    for topic in topics {
        debug!(topic = %topic, "[MQTT] subscribe topic");
    }
    Ok((client, eventloop))
}

async fn handshake(eventloop: &mut EventLoop, topics: &[String]) -> Result<(), BusError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(code = ?ack.code, "[MQTT] connected");
                if topics.is_empty() {
                    return Ok(());
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .position(|code| matches!(code, SubscribeReasonCode::Failure));
                return match rejected {
                    Some(index) => Err(BusError::SubscribeRejected(
                        topics.get(index).cloned().unwrap_or_default(),
                    )),
                    None => Ok(()),
                };
            }
            _ => {}
        }
    }
}

/// Boucle de réception : PUBLISH entrants -> `inbound`.
///
/// After a reconnect the broker has forgotten our subscriptions, so they are
/// queued again through `queue`. The loop ends once our DISCONNECT went out.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    queue: Arc<TaskQueue>,
    topics: Vec<String>,
    qos: QoS,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    debug!(topic = %p.topic, "[MQTT] receive topic");
                    let message = InboundMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                    };
                    if inbound.send(message).is_err() {
                        debug!("[MQTT] inbound receiver dropped");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] reconnected, restoring subscriptions");
                    for topic in &topics {
                        queue.add_subscribe(topic.clone(), qos);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("[MQTT] disconnect sent, event loop stopping");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "[MQTT] connection error");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}
