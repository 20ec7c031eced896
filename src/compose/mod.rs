//! ComposeDriver (C3): detects the host's `docker compose` CLI flavor,
//! selects the architecture-appropriate compose files for a package, and
//! runs up/down/pull/restart/ls against them — all through `HostShell`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ComposeError;
use crate::host::arch::Architecture;
use crate::host::HostShell;

const STATUS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Which CLI invocation form the host supports: the v2 plugin subcommand
/// (`docker compose`) or the standalone v1 binary (`docker-compose`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFlavor {
    PluginV2,
    StandaloneV1,
}

impl CliFlavor {
    pub fn prefix(&self) -> &'static str {
        match self {
            CliFlavor::PluginV2 => "docker compose",
            CliFlavor::StandaloneV1 => "docker-compose",
        }
    }
}

/// A single project's status as reported by `compose ls --format json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProjectStatus {
    pub status_string: String,
    pub config_files: Vec<String>,
    pub running_services: u32,
    pub total_services: u32,
}

/// One project-level status diff, emitted for every project whose status
/// changed between two snapshots, including a project that disappeared
/// entirely (`to == "removed"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusChange {
    pub package: String,
    pub from: Option<String>,
    pub to: String,
}

struct CachedStatus {
    at: Instant,
    projects: HashMap<String, ComposeProjectStatus>,
}

pub struct ComposeDriver<'a> {
    shell: &'a HostShell,
    flavor: Mutex<Option<CliFlavor>>,
    status_cache: Mutex<Option<CachedStatus>>,
}

impl<'a> ComposeDriver<'a> {
    pub fn new(shell: &'a HostShell) -> Self {
        Self {
            shell,
            flavor: Mutex::new(None),
            status_cache: Mutex::new(None),
        }
    }

    /// Probe `docker compose version` then `docker-compose --version`,
    /// caching the winner so concurrent callers share one detection.
    /// Defaults to `PluginV2` if neither probe succeeds cleanly (modern
    /// hosts ship the plugin; a hard failure surfaces on first real use).
    pub async fn detect_cli(&self) -> Result<CliFlavor, ComposeError> {
        let mut guard = self.flavor.lock().await;
        if let Some(flavor) = *guard {
            return Ok(flavor);
        }

        let flavor = if self
            .shell
            .exec("docker compose version", None, None)
            .await
            .map(|o| o.success())
            .unwrap_or(false)
        {
            CliFlavor::PluginV2
        } else if self
            .shell
            .exec("docker-compose --version", None, None)
            .await
            .map(|o| o.success())
            .unwrap_or(false)
        {
            CliFlavor::StandaloneV1
        } else {
            debug!("neither docker compose plugin nor docker-compose binary responded; defaulting to v2");
            CliFlavor::PluginV2
        };

        *guard = Some(flavor);
        Ok(flavor)
    }

    /// List `docker-compose*.yml` files in `dir`, excluding overlays tagged
    /// for an architecture other than `arch`, ordered ascending by path
    /// length (base file first, then shorter overlays before longer ones).
    pub async fn select_compose_files(
        &self,
        dir: &str,
        arch: Architecture,
    ) -> Result<Vec<String>, ComposeError> {
        let all = self
            .shell
            .list_files(dir, "docker-compose*.yml")
            .await
            .map_err(|e| ComposeError(e.to_string()))?;

        let other_tags: Vec<&str> = Architecture::all()
            .iter()
            .filter(|a| **a != arch)
            .map(|a| a.file_tag())
            .collect();

        let mut selected: Vec<String> = all
            .into_iter()
            .filter(|path| !other_tags.iter().any(|tag| path.contains(&format!(".{}.", tag))))
            .collect();

        selected.sort_by_key(|p| p.len());
        Ok(selected)
    }

    fn compose_command(&self, flavor: CliFlavor, files: &[String], args: &str) -> String {
        let file_flags: String = files
            .iter()
            .map(|f| format!("-f {}", crate::host::exec::shell_quote(f)))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {} {}", flavor.prefix(), file_flags, args)
    }

    pub async fn up(&self, files: &[String], cwd: &str) -> Result<(), ComposeError> {
        let flavor = self.detect_cli().await?;
        let cmd = self.compose_command(flavor, files, "up -d");
        self.run(&cmd, cwd).await
    }

    pub async fn down(&self, files: &[String], cwd: &str) -> Result<(), ComposeError> {
        let flavor = self.detect_cli().await?;
        let cmd = self.compose_command(flavor, files, "down");
        self.run(&cmd, cwd).await
    }

    pub async fn pull(&self, files: &[String], cwd: &str) -> Result<(), ComposeError> {
        let flavor = self.detect_cli().await?;
        let cmd = self.compose_command(flavor, files, "pull");
        self.run(&cmd, cwd).await
    }

    /// Restart services. `background = true` detaches the restart from the
    /// current session — required when the controller is updating its own
    /// package and must not be torn down by its own `down` command.
    pub async fn restart(&self, files: &[String], cwd: &str, background: bool) -> Result<(), ComposeError> {
        let flavor = self.detect_cli().await?;
        let cmd = self.compose_command(flavor, files, "restart");
        if background {
            let detached = format!("nohup bash -c {} > /dev/null 2>&1 & disown", crate::host::exec::shell_quote(&cmd));
            self.run(&detached, cwd).await
        } else {
            self.run(&cmd, cwd).await
        }
    }

    async fn run(&self, cmd: &str, cwd: &str) -> Result<(), ComposeError> {
        let out = self
            .shell
            .exec(cmd, Some(cwd), None)
            .await
            .map_err(|e| ComposeError(e.to_string()))?;
        if !out.success() {
            return Err(ComposeError(format!(
                "{}\nstdout: {}\nstderr: {}",
                cmd,
                out.stdout.trim(),
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Every compose project known to the host, keyed by project name, as
    /// reported by `compose ls --format json`. Cached for `STATUS_CACHE_TTL`
    /// and shared across concurrent callers.
    pub async fn status_map(&self) -> Result<HashMap<String, ComposeProjectStatus>, ComposeError> {
        {
            let cache = self.status_cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.at.elapsed() < STATUS_CACHE_TTL {
                    return Ok(cached.projects.clone());
                }
            }
        }

        let flavor = self.detect_cli().await?;
        let cmd = format!("{} ls --format json", flavor.prefix());
        let out = self
            .shell
            .exec(&cmd, None, None)
            .await
            .map_err(|e| ComposeError(e.to_string()))?;
        if !out.success() {
            return Err(ComposeError(format!("compose ls failed: {}", out.stderr.trim())));
        }

        let projects = parse_ls_output(&out.stdout);

        let mut cache = self.status_cache.lock().await;
        *cache = Some(CachedStatus {
            at: Instant::now(),
            projects: projects.clone(),
        });
        Ok(projects)
    }

    /// Diff two project-status snapshots, producing one `StatusChange` per
    /// project whose status string differs, plus one per project present in
    /// `previous` but absent from `current` (`to == "removed"`).
    pub fn diff_status(
        previous: &HashMap<String, ComposeProjectStatus>,
        current: &HashMap<String, ComposeProjectStatus>,
    ) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for (name, cur) in current {
            match previous.get(name) {
                Some(prev) if prev.status_string == cur.status_string => {}
                Some(prev) => changes.push(StatusChange {
                    package: name.clone(),
                    from: Some(prev.status_string.clone()),
                    to: cur.status_string.clone(),
                }),
                None => changes.push(StatusChange {
                    package: name.clone(),
                    from: None,
                    to: cur.status_string.clone(),
                }),
            }
        }

        for (name, prev) in previous {
            if !current.contains_key(name) {
                changes.push(StatusChange {
                    package: name.clone(),
                    from: Some(prev.status_string.clone()),
                    to: "removed".to_string(),
                });
            }
        }

        changes
    }
}

/// Parse `docker compose ls --format json` output: one JSON object per
/// line, or a single JSON array, keyed by the `Name` field.
fn parse_ls_output(stdout: &str) -> HashMap<String, ComposeProjectStatus> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return HashMap::new();
    }

    let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).unwrap_or_default()
    } else {
        trimmed
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    };

    values
        .iter()
        .filter_map(|v| {
            let name = v.get("Name").and_then(|s| s.as_str())?.to_string();
            Some((name, project_status_from_json(v)))
        })
        .collect()
}

fn project_status_from_json(v: &serde_json::Value) -> ComposeProjectStatus {
    let status_string = v.get("Status").and_then(|s| s.as_str()).unwrap_or("").to_string();

    let config_files = v
        .get("ConfigFiles")
        .and_then(|s| s.as_str())
        .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let counts = parenthesized_counts(&status_string);
    let running_services = counts.get("running").copied().unwrap_or(0);
    let total_services = if counts.is_empty() { 1 } else { counts.values().sum() };

    ComposeProjectStatus {
        status_string,
        config_files,
        running_services,
        total_services,
    }
}

/// Extract every `word(N)` pair out of a status string, e.g.
/// `"running(2), exited(1)"` → `{"running": 2, "exited": 1}`.
fn parenthesized_counts(status_string: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for part in status_string.split(',') {
        let part = part.trim();
        let Some(open) = part.find('(') else { continue };
        let Some(close) = part[open + 1..].find(')') else { continue };
        let word = part[..open].trim().to_lowercase();
        let inner = &part[open + 1..open + 1 + close];
        if let Ok(n) = inner.parse::<u32>() {
            counts.insert(word, n);
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_other_arch_overlays() {
        let files = vec![
            "/app/docker-compose.yml".to_string(),
            "/app/docker-compose.arm64.yml".to_string(),
            "/app/docker-compose.x64.yml".to_string(),
        ];
        let other_tags = ["arm64", "arm", "x86"];
        let kept: Vec<&String> = files
            .iter()
            .filter(|path| !other_tags.iter().any(|tag| path.contains(&format!(".{}.", tag))))
            .collect();
        assert_eq!(kept, vec![&files[0], &files[2]]);
    }

    #[test]
    fn parses_running_count_from_status_string() {
        let counts = parenthesized_counts("running(2)");
        assert_eq!(counts.get("running"), Some(&2));
    }

    #[test]
    fn sums_mixed_status_counts_for_total() {
        let status = project_status_from_json(&serde_json::json!({
            "Name": "myapp",
            "Status": "running(2), exited(1)",
            "ConfigFiles": "/app/docker-compose.yml"
        }));
        assert_eq!(status.running_services, 2);
        assert_eq!(status.total_services, 3);
    }

    #[test]
    fn falls_back_to_one_when_no_parenthesized_count() {
        let status = project_status_from_json(&serde_json::json!({
            "Name": "myapp",
            "Status": "running",
            "ConfigFiles": ""
        }));
        assert_eq!(status.running_services, 0);
        assert_eq!(status.total_services, 1);
    }

    #[test]
    fn parses_ls_json_lines() {
        let stdout = r#"{"Name": "a", "Status": "running(1)", "ConfigFiles": "/a/docker-compose.yml"}
{"Name": "b", "Status": "exited(1)", "ConfigFiles": "/b/docker-compose.yml"}"#;
        let projects = parse_ls_output(stdout);
        assert_eq!(projects.len(), 2);
        assert_eq!(projects["a"].running_services, 1);
        assert_eq!(projects["b"].total_services, 1);
    }

    #[test]
    fn diff_reports_changed_new_and_removed_projects() {
        let mut previous = HashMap::new();
        previous.insert(
            "web".to_string(),
            ComposeProjectStatus {
                status_string: "exited(1)".into(),
                config_files: vec![],
                running_services: 0,
                total_services: 1,
            },
        );
        previous.insert(
            "gone".to_string(),
            ComposeProjectStatus {
                status_string: "running(1)".into(),
                config_files: vec![],
                running_services: 1,
                total_services: 1,
            },
        );

        let mut current = HashMap::new();
        current.insert(
            "web".to_string(),
            ComposeProjectStatus {
                status_string: "running(1)".into(),
                config_files: vec![],
                running_services: 1,
                total_services: 1,
            },
        );
        current.insert(
            "worker".to_string(),
            ComposeProjectStatus {
                status_string: "running(1)".into(),
                config_files: vec![],
                running_services: 1,
                total_services: 1,
            },
        );

        let changes = ComposeDriver::diff_status(&previous, &current);
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().any(|c| c.package == "web" && c.from.as_deref() == Some("exited(1)")));
        assert!(changes.iter().any(|c| c.package == "worker" && c.from.is_none()));
        assert!(changes.iter().any(|c| c.package == "gone" && c.to == "removed"));
    }
}
