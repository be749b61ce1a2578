//! Fakes shared by the unit tests.

use crate::alive::Prober;
use crate::error::{BusError, PowerError};
use crate::models::{Entity, PowerOff, RemoteConfig, SshConfig};
use crate::mqtt::{BusClient, InboundMessage};
use crate::power::PowerActions;
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symbion_devkit::{MockMessage, MockMqttClient};

#[async_trait]
impl BusClient for MockMqttClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        MockMqttClient::subscribe(self, topic, qos)
            .await
            .map_err(|e| BusError::Other(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) -> Result<(), BusError> {
        MockMqttClient::publish(self, topic, qos, retain, payload)
            .await
            .map_err(|e| BusError::Other(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        MockMqttClient::disconnect(self)
            .await
            .map_err(|e| BusError::Other(e.to_string()))
    }
}

impl From<MockMessage> for InboundMessage {
    fn from(message: MockMessage) -> Self {
        InboundMessage {
            topic: message.topic,
            payload: message.payload,
        }
    }
}

/// Prober whose answer is set by the test.
#[derive(Debug, Default)]
pub struct FakeProber {
    alive: AtomicBool,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(alive: bool) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(alive),
            ..Self::default()
        })
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, _address: &str, _timeout: Duration) -> io::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("unreachable"));
        }
        Ok(self.alive.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCall {
    Wake,
    Suspend,
    Shutdown,
}

/// Records power actions instead of touching the network.
#[derive(Debug, Default)]
pub struct RecordingPower {
    calls: Mutex<Vec<PowerCall>>,
    failing: AtomicBool,
}

impl RecordingPower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every action is recorded, then fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<PowerCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: PowerCall) -> Result<(), PowerError> {
        self.calls.lock().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PowerError::Timeout {
                action: "fake",
                timeout: Duration::ZERO,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PowerActions for RecordingPower {
    async fn wake(&self, _remote: &RemoteConfig) -> Result<(), PowerError> {
        self.record(PowerCall::Wake)
    }

    async fn suspend(&self, _remote: &RemoteConfig) -> Result<(), PowerError> {
        self.record(PowerCall::Suspend)
    }

    async fn shutdown(&self, _remote: &RemoteConfig) -> Result<(), PowerError> {
        self.record(PowerCall::Shutdown)
    }
}

pub fn remote() -> RemoteConfig {
    RemoteConfig {
        ssh: SshConfig {
            username: "mark".into(),
            password: Some("hunter2".into()),
            private_key: None,
            private_key_path: None,
            port: None,
        },
        mac_address: "AA:BB:CC:DD:EE:FF".into(),
        ip_address: "192.168.1.20".into(),
        subnet_mask: None,
        power_off: PowerOff::Shutdown,
    }
}

pub fn entity(id: &str) -> Entity {
    Entity {
        id: id.into(),
        name: format!("PC {id}"),
        remote: remote(),
    }
}
