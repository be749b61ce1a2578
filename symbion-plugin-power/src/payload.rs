/**
 * PAYLOADS - Messages échangés avec Home Assistant
 *
 * Switch state strings and the MQTT discovery document published once per
 * entity (retained) so Home Assistant creates the switch by itself.
 */

use crate::models::Entity;
use crate::topic::{TopicKind, Topics};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    On,
    Off,
}

impl StatusMessage {
    pub fn from_alive(alive: bool) -> Self {
        if alive {
            StatusMessage::On
        } else {
            StatusMessage::Off
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusMessage::On => "ON",
            StatusMessage::Off => "OFF",
        }
    }
}

impl FromStr for StatusMessage {
    type Err = ();

    // exact match, HA always sends upper case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON" => Ok(StatusMessage::On),
            "OFF" => Ok(StatusMessage::Off),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPayload {
    pub unique_id: String,
    pub name: String,
    pub command_topic: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub optimistic: bool,
    pub qos: u8,
    pub device: DeviceInfo,
    pub origin: OriginInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginInfo {
    pub name: String,
    pub sw_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
}

impl OriginInfo {
    pub fn current() -> Self {
        let repository = env!("CARGO_PKG_REPOSITORY");
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
            support_url: (!repository.is_empty()).then(|| repository.to_string()),
        }
    }
}

pub fn build_device(topics: &Topics) -> DeviceInfo {
    DeviceInfo {
        identifiers: vec![format!("{}_{}", topics.namespace(), topics.device_id())],
        name: format!("{}.{}", topics.namespace(), topics.device_id()),
        model: topics.namespace().to_string(),
        manufacturer: "Symbion".to_string(),
    }
}

/// Document de discovery pour une entité (deterministe : mêmes entrées, même JSON).
pub fn build_discovery(topics: &Topics, entity: &Entity, qos: QoS) -> DiscoveryPayload {
    DiscoveryPayload {
        unique_id: topics.unique_id(&entity.id),
        name: entity.name.clone(),
        command_topic: topics.entity(&entity.id, TopicKind::Command),
        state_topic: topics.entity(&entity.id, TopicKind::State),
        availability_topic: topics.entity(&entity.id, TopicKind::Availability),
        optimistic: true,
        qos: qos as u8,
        device: build_device(topics),
        origin: OriginInfo::current(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entity;

    #[test]
    fn test_status_message() {
        assert_eq!(StatusMessage::from_alive(true).as_str(), "ON");
        assert_eq!(StatusMessage::from_alive(false).as_str(), "OFF");
        assert_eq!("ON".parse::<StatusMessage>(), Ok(StatusMessage::On));
        assert!("on".parse::<StatusMessage>().is_err());
        assert!("TOGGLE".parse::<StatusMessage>().is_err());
    }

    #[test]
    fn test_discovery_document() {
        let topics = Topics::new("symbion-power", "office");
        let payload = build_discovery(&topics, &entity("pc1"), QoS::AtLeastOnce);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["unique_id"], "symbion-power_office_pc1");
        assert_eq!(json["command_topic"], "symbion-power/office/pc1/set");
        assert_eq!(json["state_topic"], "symbion-power/office/pc1/state");
        assert_eq!(json["availability_topic"], "symbion-power/office/pc1/availability");
        assert_eq!(json["optimistic"], true);
        assert_eq!(json["qos"], 1);
        assert_eq!(json["device"]["identifiers"][0], "symbion-power_office");
        assert_eq!(json["device"]["name"], "symbion-power.office");
        assert_eq!(json["origin"]["name"], "symbion-plugin-power");
        assert_eq!(json["origin"]["sw_version"], env!("CARGO_PKG_VERSION"));

        // deterministic
        assert_eq!(payload, build_discovery(&topics, &entity("pc1"), QoS::AtLeastOnce));
    }
}
