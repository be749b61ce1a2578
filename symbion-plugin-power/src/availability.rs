use crate::mqtt::TaskQueue;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Heartbeat `online` sur chaque topic availability, `offline` à l'arrêt.
pub struct Availability {
    topics: Arc<Vec<String>>,
    queue: Arc<TaskQueue>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Availability {
    /// First heartbeat one `interval` after start; use `push_online` for an immediate one.
    pub fn start(topics: Vec<String>, queue: Arc<TaskQueue>, interval: Duration) -> Self {
        let topics = Arc::new(topics);
        let period = interval.max(Duration::from_millis(1));

        let timer = {
            let topics = Arc::clone(&topics);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    publish_all(&queue, &topics, ONLINE);
                }
            })
        };

        Self {
            topics,
            queue,
            timer: Mutex::new(Some(timer)),
        }
    }

    pub fn push_online(&self) {
        publish_all(&self.queue, &self.topics, ONLINE);
    }

    /// Stops the heartbeat and queues `offline`; only the first call does anything.
    pub fn close(&self) {
        let Some(timer) = self.timer.lock().take() else {
            return;
        };
        timer.abort();
        publish_all(&self.queue, &self.topics, OFFLINE);
        info!(topics = self.topics.len(), "availability set to offline");
    }
}

fn publish_all(queue: &TaskQueue, topics: &[String], status: &str) {
    for topic in topics {
        debug!(topic = %topic, status, "availability");
        queue.publish(topic.clone(), status, QoS::AtMostOnce, false);
    }
}
