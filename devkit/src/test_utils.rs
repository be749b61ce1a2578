/*!
Test Harness pour plugins Symbion

Wraps a `MockMqttClient` with the waits and JSON assertions plugin tests
keep rewriting: wait until N messages landed on a topic, check a field of the
last JSON document published somewhere.
*/

use crate::mqtt_stub::MockMqttClient;
use serde_json::Value;
use std::time::Duration;
use anyhow::Result;

/// Harness de test pour plugins Symbion
#[derive(Clone)]
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
}

impl TestHarness {
    /// Crée un nouveau harness de test
    pub fn new() -> Self {
        env_logger::builder().is_test(true).try_init().ok();

        Self {
            mqtt_client: MockMqttClient::new(),
        }
    }

    /// Attend que `count` messages soient publiés sur `topic`, renvoie leurs payloads.
    ///
    /// Uses `tokio::time::sleep`, so it also works under a paused test clock.
    pub async fn wait_for_payloads(&self, topic: &str, count: usize, timeout_ms: u64) -> Result<Vec<String>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let payloads = self.mqtt_client.payloads_for(topic);
            if payloads.len() >= count {
                log::info!("✅ Received {} message(s) on {}", payloads.len(), topic);
                return Ok(payloads);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "Timeout waiting for {} message(s) on {}: got {}",
                    count, topic, payloads.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Assert qu'un champ a une valeur spécifique dans le dernier message JSON
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}",
                             field_path, expected, actual);
            }
        }

        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            Value::Array(items) => current = items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }

    Some(current)
}
