//! HostShell (C1): a connection-pooled privileged shell to the host.
//! All mutation of the host filesystem or Docker goes through this type.

pub mod arch;
pub mod exec;
pub mod glob;

use std::time::Duration;

use openssh::{KnownHosts, Session, SessionBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;

use arch::Architecture;

const CONNECT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Supported SSH authentication strategies, selected via `SshAuthMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthMethod {
    Password,
    PrivateKey,
    PrivateKeyWithPassphrase,
    KeyWithPasswordFallback,
}

#[derive(Debug, Clone)]
pub struct HostShellConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub auth: AuthMethod,
    pub key_path: Option<String>,
    /// Only relevant for `PrivateKeyWithPassphrase` / `KeyWithPasswordFallback`.
    /// Passed to the underlying `ssh` binary's agent/askpass flow, never
    /// logged or echoed back.
    pub key_passphrase: Option<String>,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub enable_compression: bool,
}

impl HostShellConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.auth {
            AuthMethod::PrivateKey | AuthMethod::KeyWithPasswordFallback if self.key_path.is_none() => {
                Err(format!("{:?} requires SshKeyPath", self.auth))
            }
            AuthMethod::PrivateKeyWithPassphrase if self.key_path.is_none() => {
                Err("PrivateKeyWithPassphrase requires SshKeyPath".to_string())
            }
            AuthMethod::PrivateKeyWithPassphrase if self.key_passphrase.is_none() => {
                Err("PrivateKeyWithPassphrase requires SshKeyPassphrase".to_string())
            }
            _ => Ok(()),
        }
    }
}

pub struct HostShell {
    session: Session,
    host: String,
}

impl HostShell {
    /// Establish the channel, retrying transient failures up to
    /// `CONNECT_RETRIES` times with a fixed backoff; the final failure is
    /// fatal. Runs a connectivity self-test (`echo ok`) before returning.
    pub async fn connect(config: &HostShellConfig) -> Result<Self, ChannelError> {
        config.validate().map_err(|msg| ChannelError::Connect {
            user: config.user.clone(),
            host: config.host.clone(),
            source: anyhow::anyhow!(msg),
        })?;

        let mut last_err = None;
        for attempt in 1..=CONNECT_RETRIES + 1 {
            match Self::try_connect_once(config).await {
                Ok(shell) => {
                    shell.self_test().await?;
                    return Ok(shell);
                }
                Err(e) => {
                    warn!(attempt, host = %config.host, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    if attempt <= CONNECT_RETRIES {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ChannelError::Connect {
            user: config.user.clone(),
            host: config.host.clone(),
            source: anyhow::anyhow!("exhausted retries"),
        }))
    }

    async fn try_connect_once(config: &HostShellConfig) -> Result<Self, ChannelError> {
        debug!(user = %config.user, host = %config.host, auth = ?config.auth, "connecting");

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(config.user.clone());
        builder.port(config.port);
        builder.connect_timeout(config.timeout);
        builder.server_alive_interval(config.keep_alive);
        builder.compression(config.enable_compression);

        match config.auth {
            AuthMethod::PrivateKey
            | AuthMethod::PrivateKeyWithPassphrase
            | AuthMethod::KeyWithPasswordFallback => {
                if let Some(key) = &config.key_path {
                    builder.keyfile(key);
                }
            }
            AuthMethod::Password => {
                // openssh shells out to the system `ssh` binary, which has
                // no native password prompt automation; non-interactive
                // password auth relies on an external agent (e.g.
                // `sshpass`) already wired into the environment's SSH
                // configuration for this host.
            }
        }

        let session = builder.connect(&config.host).await.map_err(|e| ChannelError::Connect {
            user: config.user.clone(),
            host: config.host.clone(),
            source: anyhow::anyhow!(e),
        })?;

        Ok(Self {
            session,
            host: config.host.clone(),
        })
    }

    async fn self_test(&self) -> Result<(), ChannelError> {
        let out = self.exec("echo ok", None, None).await?;
        if out.success() && out.stdout.trim() == "ok" {
            Ok(())
        } else {
            Err(ChannelError::SelfTestFailed {
                host: self.host.clone(),
            })
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn architecture(&self) -> Result<Architecture, ChannelError> {
        let out = self.exec_ok("uname -m").await?;
        Architecture::parse(&out)
    }

    pub async fn close(self) -> Result<(), ChannelError> {
        self.session.close().await.map_err(|e| ChannelError::Exec {
            host: self.host.clone(),
            source: anyhow::anyhow!(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> HostShellConfig {
        HostShellConfig {
            user: "deploy".into(),
            host: "10.0.0.5".into(),
            port: 22,
            auth: AuthMethod::Password,
            key_path: None,
            key_passphrase: None,
            timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
            enable_compression: true,
        }
    }

    #[test]
    fn password_auth_needs_no_key() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn private_key_without_path_is_invalid() {
        let mut cfg = base_config();
        cfg.auth = AuthMethod::PrivateKey;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn passphrase_mode_requires_both_fields() {
        let mut cfg = base_config();
        cfg.auth = AuthMethod::PrivateKeyWithPassphrase;
        cfg.key_path = Some("/home/deploy/.ssh/id_ed25519".into());
        assert!(cfg.validate().is_err(), "missing passphrase should fail");
        cfg.key_passphrase = Some("hunter2".into());
        assert!(cfg.validate().is_ok());
    }
}
