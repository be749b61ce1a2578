use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Contenu du fichier de config : un device logique et ses PCs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device_id: String,
    pub entities: Vec<Entity>,
}

/// Un PC piloté, vu comme un switch côté Home Assistant.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub ssh: SshConfig,
    pub mac_address: String,
    pub ip_address: String,
    #[serde(default)]
    pub subnet_mask: Option<String>,
    #[serde(default)]
    pub power_off: PowerOff,
}

/// Ce que déclenche un OFF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerOff {
    #[default]
    Shutdown,
    Suspend,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl SshConfig {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }
}

// secrets never reach the logs
impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("port", &self.port())
            .finish()
    }
}
