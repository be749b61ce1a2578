/*!
# Symbion DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement de plugins Symbion avec:
- Stubs MQTT pour tests sans broker
- Harness de test (attentes sur topics, assertions JSON)
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use test_utils::TestHarness;
