//! DeploymentStateStore (C6): atomic read/write of `deployment.state.json`
//! on the host, via HostShell's elevation-aware file operations.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StateError;
use crate::host::HostShell;
use crate::version::Version;

const STATE_FILE_NAME: &str = "deployment.state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub version: String,
    #[serde(rename = "updated")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "up")]
    pub applied: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl DeploymentState {
    pub fn applied_versions(&self) -> BTreeSet<Version> {
        self.applied.iter().filter_map(|s| Version::parse(s)).collect()
    }
}

pub struct DeploymentStateStore<'a> {
    shell: &'a HostShell,
}

impl<'a> DeploymentStateStore<'a> {
    pub fn new(shell: &'a HostShell) -> Self {
        Self { shell }
    }

    fn path(&self, folder: &str) -> String {
        format!("{}/{}", folder.trim_end_matches('/'), STATE_FILE_NAME)
    }

    /// Returns `None` on a missing or corrupt file; corruption is logged,
    /// never surfaced as an error to the orchestrator.
    pub async fn read(&self, folder: &str) -> Option<DeploymentState> {
        let path = self.path(folder);
        if !self.shell.file_exists(&path).await.unwrap_or(false) {
            return None;
        }

        let bytes = match self.shell.read_file(&path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to read deployment state");
                return None;
            }
        };

        match serde_json::from_slice::<DeploymentState>(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %path, error = %e, "corrupt deployment state, ignoring");
                None
            }
        }
    }

    pub async fn write(&self, folder: &str, state: &DeploymentState) -> Result<(), StateError> {
        self.shell
            .mkdir_all(folder)
            .await
            .map_err(|e| StateError(e.to_string()))?;

        let bytes = serde_json::to_vec_pretty(state).map_err(|e| StateError(e.to_string()))?;

        self.shell
            .write_file(&self.path(folder), &bytes)
            .await
            .map_err(|e| StateError(e.to_string()))
    }

    pub async fn current_version(&self, folder: &str) -> Option<String> {
        self.read(folder).await.map(|s| s.version)
    }

    pub async fn exists(&self, folder: &str) -> bool {
        self.shell.file_exists(&self.path(folder)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let state = DeploymentState {
            version: "v1.2.0".to_string(),
            updated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            applied: BTreeSet::from(["1.0.1".to_string(), "1.1.0".to_string()]),
            failed: BTreeSet::new(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let parsed: DeploymentState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, state.version);
        assert_eq!(parsed.applied, state.applied);
    }

    #[test]
    fn applied_versions_skips_unparseable() {
        let state = DeploymentState {
            version: "v1.0.0".to_string(),
            updated_at: Utc::now(),
            applied: BTreeSet::from(["1.0.0".to_string(), "garbage".to_string()]),
            failed: BTreeSet::new(),
        };
        assert_eq!(state.applied_versions().len(), 1);
    }

    #[test]
    fn corrupt_json_fails_to_parse() {
        let result: Result<DeploymentState, _> = serde_json::from_str("{not json");
        assert!(result.is_err());
    }
}
