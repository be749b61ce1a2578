//! SSH power-off: connect, detect the remote OS with `uname`, run the matching
//! suspend/shutdown command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::ssh_key;
use russh::keys::ssh_key::PrivateKey;
use russh::keys::{decode_secret_key, load_secret_key, PrivateKeyWithHashAlg};
use russh::{client, ChannelMsg, Disconnect};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::PowerError;
use crate::models::SshConfig;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const UNAME_TIMEOUT: Duration = Duration::from_secs(10);
// the host usually drops the link before answering
const POWER_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOs {
    Linux,
    Darwin,
    Windows,
}

impl RemoteOs {
    /// Anything that is neither Linux nor Darwin (including a failed `uname`) is Windows.
    pub fn from_uname(output: &str) -> Self {
        let output = output.trim();
        if output.contains("Linux") {
            RemoteOs::Linux
        } else if output.contains("Darwin") {
            RemoteOs::Darwin
        } else {
            RemoteOs::Windows
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    Suspend,
    Shutdown,
}

impl PowerCommand {
    pub fn command_for(self, os: RemoteOs) -> &'static str {
        match (self, os) {
            (PowerCommand::Suspend, RemoteOs::Linux) => "sudo systemctl suspend",
            (PowerCommand::Suspend, RemoteOs::Darwin) => "sudo pmset sleepnow",
            (PowerCommand::Suspend, RemoteOs::Windows) => {
                "rundll32.exe powrprof.dll,SetSuspendState 0,1,0"
            }
            (PowerCommand::Shutdown, RemoteOs::Linux) => "sudo shutdown now",
            // pmset has no shutdown, sleep is the closest non-interactive action
            (PowerCommand::Shutdown, RemoteOs::Darwin) => "sudo pmset sleepnow",
            (PowerCommand::Shutdown, RemoteOs::Windows) => "shutdown /s /t 0",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PowerCommand::Suspend => "suspend",
            PowerCommand::Shutdown => "shutdown",
        }
    }
}

/// Authentication picked from an `SshConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    InlineKey,
    KeyFile(PathBuf),
    Password,
}

/// Inline key, then key file, then password; with none of them `~/.ssh/id_rsa`.
pub fn auth_method(ssh: &SshConfig) -> Result<AuthMethod, PowerError> {
    if ssh.private_key.is_some() {
        return Ok(AuthMethod::InlineKey);
    }
    if let Some(path) = &ssh.private_key_path {
        return Ok(AuthMethod::KeyFile(path.clone()));
    }
    if ssh.password.is_some() {
        return Ok(AuthMethod::Password);
    }
    dirs::home_dir()
        .map(|home| AuthMethod::KeyFile(home.join(".ssh").join("id_rsa")))
        .ok_or_else(|| PowerError::SshKey("no credentials and no home directory".to_string()))
}

struct PowerClientHandler;

impl client::Handler for PowerClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // hosts are reached by LAN address, there is no known_hosts to check against
        Ok(true)
    }
}

struct SshSession {
    host: String,
    handle: client::Handle<PowerClientHandler>,
}

impl SshSession {
    async fn connect(ssh: &SshConfig, host: &str) -> Result<Self, PowerError> {
        let config = Arc::new(client::Config::default());
        let connecting = client::connect(config, (host, ssh.port()), PowerClientHandler);
        let mut handle = timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| PowerError::Timeout {
                action: "ssh connect",
                timeout: CONNECT_TIMEOUT,
            })?
            .map_err(|e| PowerError::SshConnect {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let auth_error = |reason: String| PowerError::SshAuth {
            user: ssh.username.clone(),
            host: host.to_string(),
            reason,
        };

        let accepted = match auth_method(ssh)? {
            AuthMethod::Password => {
                let password = ssh.password.as_deref().unwrap_or_default();
                handle
                    .authenticate_password(&ssh.username, password)
                    .await
                    .map_err(|e| auth_error(e.to_string()))?
                    .success()
            }
            method => {
                let key = load_key(ssh, &method)?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(
                        &ssh.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| auth_error(e.to_string()))?
                    .success()
            }
        };
        if !accepted {
            return Err(auth_error("rejected by server".to_string()));
        }

        debug!(host = %host, user = %ssh.username, "ssh session open");
        Ok(Self {
            host: host.to_string(),
            handle,
        })
    }

    /// Runs `command`, returns its stdout and exit status (if one was sent).
    async fn exec(&self, command: &str) -> Result<(String, Option<u32>), PowerError> {
        let exec_error = |e: russh::Error| PowerError::SshExec {
            command: command.to_string(),
            reason: e.to_string(),
        };

        let mut channel = self.handle.channel_open_session().await.map_err(exec_error)?;
        channel.exec(true, command).await.map_err(exec_error)?;

        let mut stdout = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                ChannelMsg::Eof => break,
                _ => {}
            }
        }
        Ok((String::from_utf8_lossy(&stdout).into_owned(), status))
    }

    async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.host, error = %e, "ssh disconnect");
        }
    }
}

fn load_key(ssh: &SshConfig, method: &AuthMethod) -> Result<PrivateKey, PowerError> {
    let passphrase = ssh.password.as_deref();
    match method {
        AuthMethod::InlineKey => {
            let pem = ssh.private_key.as_deref().unwrap_or_default();
            decode_secret_key(pem, passphrase).map_err(|e| PowerError::SshKey(e.to_string()))
        }
        AuthMethod::KeyFile(path) => load_secret_key(path, passphrase)
            .map_err(|e| PowerError::SshKey(format!("{}: {e}", path.display()))),
        AuthMethod::Password => Err(PowerError::SshKey("password auth has no key".to_string())),
    }
}

/// Connects to `host` and runs the power command matching its OS.
///
/// Once the command is sent the host may go down mid-exchange: a timeout or a
/// channel error at that point is expected and only logged.
pub async fn run_power_command(
    ssh: &SshConfig,
    host: &str,
    command: PowerCommand,
) -> Result<(), PowerError> {
    let session = SshSession::connect(ssh, host).await?;

    let uname = match timeout(UNAME_TIMEOUT, session.exec("uname")).await {
        Ok(Ok((stdout, _))) => stdout,
        Ok(Err(e)) => {
            warn!(host = %host, error = %e, "uname failed, assuming windows");
            String::new()
        }
        Err(_) => {
            session.close().await;
            return Err(PowerError::Timeout {
                action: "uname",
                timeout: UNAME_TIMEOUT,
            });
        }
    };
    let os = RemoteOs::from_uname(&uname);
    let line = command.command_for(os);
    info!(host = %host, os = ?os, command = %line, "sending {}", command.name());

    match timeout(POWER_COMMAND_TIMEOUT, session.exec(line)).await {
        Ok(Ok((_, status))) => debug!(host = %host, status = ?status, "power command returned"),
        Ok(Err(e)) => debug!(host = %host, error = %e, "power command channel closed"),
        Err(_) => debug!(host = %host, "power command still running, host going down"),
    }

    session.close().await;
    Ok(())
}
