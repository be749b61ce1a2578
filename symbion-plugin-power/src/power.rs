use crate::error::PowerError;
use crate::models::{PowerOff, RemoteConfig};
use crate::ssh::{self, PowerCommand};
use crate::wol;
use async_trait::async_trait;
use tracing::info;

/// Remote power operations on a PC.
#[async_trait]
pub trait PowerActions: Send + Sync {
    async fn wake(&self, remote: &RemoteConfig) -> Result<(), PowerError>;
    async fn suspend(&self, remote: &RemoteConfig) -> Result<(), PowerError>;
    async fn shutdown(&self, remote: &RemoteConfig) -> Result<(), PowerError>;

    /// What an OFF command does for this PC.
    async fn power_off(&self, remote: &RemoteConfig) -> Result<(), PowerError> {
        match remote.power_off {
            PowerOff::Shutdown => self.shutdown(remote).await,
            PowerOff::Suspend => self.suspend(remote).await,
        }
    }
}

/// Wake-on-LAN pour allumer, SSH pour éteindre.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemotePower;

#[async_trait]
impl PowerActions for RemotePower {
    async fn wake(&self, remote: &RemoteConfig) -> Result<(), PowerError> {
        info!(mac = %remote.mac_address, "sending wake-on-lan");
        wol::send(remote).await
    }

    async fn suspend(&self, remote: &RemoteConfig) -> Result<(), PowerError> {
        ssh::run_power_command(&remote.ssh, &remote.ip_address, PowerCommand::Suspend).await
    }

    async fn shutdown(&self, remote: &RemoteConfig) -> Result<(), PowerError> {
        ssh::run_power_command(&remote.ssh, &remote.ip_address, PowerCommand::Shutdown).await
    }
}
