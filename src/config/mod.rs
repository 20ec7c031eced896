use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod validate;

use crate::host::AuthMethod;

fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_timeout_seconds() -> u64 {
    30
}
fn default_ssh_keep_alive_seconds() -> u64 {
    30
}
fn default_ssh_enable_compression() -> bool {
    true
}
fn default_host_address() -> String {
    "172.17.0.1".to_string()
}
fn default_compose_subdir() -> String {
    "./".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    pub ssh_host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_pwd: Option<String>,
    pub ssh_key_path: Option<String>,
    pub ssh_key_passphrase: Option<String>,
    pub ssh_auth_method: AuthMethod,
    #[serde(default = "default_ssh_timeout_seconds")]
    pub ssh_timeout_seconds: u64,
    #[serde(default = "default_ssh_keep_alive_seconds")]
    pub ssh_keep_alive_seconds: u64,
    #[serde(default = "default_ssh_enable_compression")]
    pub ssh_enable_compression: bool,
    /// Fallback host endpoint when `ssh_host` is absent.
    #[serde(default = "default_host_address")]
    pub host_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageEntry {
    pub repository_url: String,
    pub local_repo_path: String,
    #[serde(default = "default_compose_subdir")]
    pub compose_subdir: String,
    pub registry_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub ssh: SshConfig,
    /// Packages shipped as part of the controller's own baseline catalog.
    #[serde(default)]
    pub std_packages: Vec<PackageEntry>,
    /// User-configured packages; override `std_packages` by derived name.
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
    /// Keyed by package name.
    #[serde(default)]
    pub docker_auth: HashMap<String, String>,
    /// Out of scope for the core controller; acknowledged and passed
    /// through unused.
    pub vpn_provider_access: Option<toml::Value>,
    /// The package name identifying the controller's own deployment, used
    /// to apply the self-update isolation rules. Not a spec-enumerated
    /// key; set via the environment or left unset.
    #[serde(default)]
    pub self_package_name: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        validate::validate(&config)?;

        Ok(config)
    }

    pub fn host_shell_config(&self) -> crate::host::HostShellConfig {
        crate::host::HostShellConfig {
            user: self.ssh.ssh_user.clone(),
            host: self.ssh.ssh_host.clone().unwrap_or_else(|| self.ssh.host_address.clone()),
            port: self.ssh.ssh_port,
            auth: self.ssh.ssh_auth_method,
            key_path: self.ssh.ssh_key_path.clone(),
            key_passphrase: self.ssh.ssh_key_passphrase.clone(),
            timeout: std::time::Duration::from_secs(self.ssh.ssh_timeout_seconds),
            keep_alive: std::time::Duration::from_secs(self.ssh.ssh_keep_alive_seconds),
            enable_compression: self.ssh.ssh_enable_compression,
        }
    }
}
