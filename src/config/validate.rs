use anyhow::{bail, Result};

use super::Config;
use crate::host::AuthMethod;

pub fn validate(config: &Config) -> Result<()> {
    if config.ssh.ssh_host.is_none() && config.ssh.host_address.is_empty() {
        bail!("either ssh.ssh_host or ssh.host_address must be set");
    }

    if config.ssh.ssh_user.is_empty() {
        bail!("ssh.ssh_user cannot be empty");
    }

    match config.ssh.ssh_auth_method {
        AuthMethod::PrivateKey | AuthMethod::KeyWithPasswordFallback if config.ssh.ssh_key_path.is_none() => {
            bail!("ssh.ssh_auth_method {:?} requires ssh_key_path", config.ssh.ssh_auth_method);
        }
        AuthMethod::PrivateKeyWithPassphrase if config.ssh.ssh_key_path.is_none() || config.ssh.ssh_key_passphrase.is_none() => {
            bail!("ssh.ssh_auth_method PrivateKeyWithPassphrase requires ssh_key_path and ssh_key_passphrase");
        }
        _ => {}
    }

    // Collisions between std_packages and packages are intentionally
    // allowed: packages wins last-write-wins on matching derived name.
    for entry in config.std_packages.iter().chain(config.packages.iter()) {
        if entry.repository_url.is_empty() {
            bail!("package with local_repo_path '{}' has an empty repository_url", entry.local_repo_path);
        }
        if entry.local_repo_path.is_empty() {
            bail!("a package entry has an empty local_repo_path");
        }
    }

    Ok(())
}
