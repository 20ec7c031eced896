//! BackupDriver (C5): invoke package-provided `backup.sh`/`restore.sh`
//! under a small JSON protocol, never parsing free-form stdout.

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, RestoreError};
use crate::host::HostShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Backup,
    Restore,
}

impl ScriptKind {
    fn file_name(&self) -> &'static str {
        match self {
            ScriptKind::Backup => "backup.sh",
            ScriptKind::Restore => "restore.sh",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BackupScriptResponse {
    success: bool,
    file: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RestoreScriptResponse {
    success: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub filename: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub version: Option<String>,
    #[serde(rename = "gitTagExists")]
    pub git_tag_exists: bool,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "fullPath")]
    pub full_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BackupListResponse {
    backups: Vec<BackupRecord>,
    #[serde(rename = "totalCount")]
    #[allow(dead_code)]
    total_count: u64,
    #[serde(rename = "totalSizeBytes")]
    #[allow(dead_code)]
    total_size_bytes: u64,
    #[serde(rename = "totalSize")]
    #[allow(dead_code)]
    total_size: String,
}

pub struct BackupDriver<'a> {
    shell: &'a HostShell,
}

impl<'a> BackupDriver<'a> {
    pub fn new(shell: &'a HostShell) -> Self {
        Self { shell }
    }

    pub async fn script_exists(&self, kind: ScriptKind, dir: &str) -> bool {
        self.shell
            .file_exists(&format!("{}/{}", dir.trim_end_matches('/'), kind.file_name()))
            .await
            .unwrap_or(false)
    }

    /// Run `backup.sh [--version=<v>] --format=json` and return the
    /// created file's name on success.
    pub async fn create(&self, dir: &str, version: Option<&str>) -> Result<String, BackupError> {
        let version_flag = version.map(|v| format!(" --version={}", v)).unwrap_or_default();
        let cmd = format!("sudo bash ./backup.sh{} --format=json", version_flag);

        let out = self
            .shell
            .exec(&cmd, Some(dir), None)
            .await
            .map_err(|e| BackupError(e.to_string()))?;

        if !out.success() {
            return Err(BackupError(format!(
                "backup.sh exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }

        let response: BackupScriptResponse =
            serde_json::from_str(out.stdout.trim()).map_err(|e| BackupError(format!("malformed backup.sh output: {}", e)))?;

        if !response.success {
            return Err(BackupError(response.error.unwrap_or_else(|| "backup.sh reported failure".to_string())));
        }

        response.file.ok_or_else(|| BackupError("backup.sh reported success without a file name".to_string()))
    }

    /// Run `restore.sh --file="<name>" --format=json`.
    pub async fn restore(&self, dir: &str, filename_or_path: &str) -> Result<(), RestoreError> {
        let cmd = format!(
            "sudo bash ./restore.sh --file={} --format=json",
            crate::host::exec::shell_quote(filename_or_path)
        );

        let out = self
            .shell
            .exec(&cmd, Some(dir), None)
            .await
            .map_err(|e| RestoreError(e.to_string()))?;

        if !out.success() {
            return Err(RestoreError(format!(
                "restore.sh exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }

        let response: RestoreScriptResponse =
            serde_json::from_str(out.stdout.trim()).map_err(|e| RestoreError(format!("malformed restore.sh output: {}", e)))?;

        if !response.success {
            return Err(RestoreError(response.error.unwrap_or_else(|| "restore.sh reported failure".to_string())));
        }

        Ok(())
    }

    pub async fn list(&self, dir: &str) -> Result<Vec<BackupRecord>, BackupError> {
        let cmd = "sudo bash ./backup.sh list --format=json";
        let out = self
            .shell
            .exec(cmd, Some(dir), None)
            .await
            .map_err(|e| BackupError(e.to_string()))?;

        if !out.success() {
            return Err(BackupError(format!(
                "backup.sh list exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }

        let response: BackupListResponse =
            serde_json::from_str(out.stdout.trim()).map_err(|e| BackupError(format!("malformed backup.sh list output: {}", e)))?;

        Ok(response.backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_backup_response() {
        let raw = r#"{"success": true, "file": "backup-1.2.0.tar.gz"}"#;
        let response: BackupScriptResponse = serde_json::from_str(raw).unwrap();
        assert!(response.success);
        assert_eq!(response.file.as_deref(), Some("backup-1.2.0.tar.gz"));
    }

    #[test]
    fn parses_failed_restore_response() {
        let raw = r#"{"success": false, "error": "archive missing"}"#;
        let response: RestoreScriptResponse = serde_json::from_str(raw).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("archive missing"));
    }

    #[test]
    fn parses_backup_list_response() {
        let raw = r#"{
            "backups": [
                {"filename": "a.tar.gz", "displayName": "a", "version": "1.0.0",
                 "gitTagExists": true, "sizeBytes": 10, "createdAt": "2026-01-01T00:00:00Z",
                 "fullPath": "/app/a.tar.gz"}
            ],
            "totalCount": 1,
            "totalSizeBytes": 10,
            "totalSize": "10 B"
        }"#;
        let response: BackupListResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.backups.len(), 1);
        assert_eq!(response.backups[0].filename, "a.tar.gz");
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result: Result<BackupScriptResponse, _> = serde_json::from_str("not json");
        assert!(result.is_err());
    }
}
