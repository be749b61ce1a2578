use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Problems found while reading the environment or the device file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cannot read device file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse device file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("entity id must not be empty")]
    EmptyEntityId,

    #[error("entity id {0:?} must not contain '/', '+' or '#'")]
    InvalidEntityId(String),

    #[error("duplicate entity id {0}")]
    DuplicateEntity(String),
}

/// Failures talking to the MQTT broker.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("broker did not complete the handshake within {0:?}")]
    Timeout(Duration),

    #[error("broker rejected subscription to {0}")]
    SubscribeRejected(String),

    #[error("bus operation failed: {0}")]
    Other(String),
}

/// Failures of a remote power action (wake, suspend, shutdown).
#[derive(Debug, Error)]
pub enum PowerError {
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    #[error("{0} does not belong to class A, B or C, set subnetMask explicitly")]
    NoDefaultSubnet(Ipv4Addr),

    #[error("wake-on-lan send failed: {0}")]
    Wol(#[source] std::io::Error),

    #[error("ssh connection to {host} failed: {reason}")]
    SshConnect { host: String, reason: String },

    #[error("ssh authentication failed for {user}@{host}: {reason}")]
    SshAuth {
        user: String,
        host: String,
        reason: String,
    },

    #[error("ssh key error: {0}")]
    SshKey(String),

    #[error("ssh command {command:?} failed: {reason}")]
    SshExec { command: String, reason: String },

    #[error("{action} timed out after {timeout:?}")]
    Timeout {
        action: &'static str,
        timeout: Duration,
    },
}
