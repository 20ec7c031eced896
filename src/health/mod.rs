//! HealthChecker (C7): enumerate a package's compose services and
//! classify the deployment as healthy, degraded, or critically failed.

use crate::compose::CliFlavor;
use crate::error::HealthError;
use crate::host::HostShell;

const DEFAULT_CRITICAL_SUBSTRINGS: &[&str] = &["database", "api", "core", "main", "primary"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSnapshot {
    AllHealthy,
    Unhealthy { services: Vec<String> },
    CriticalFailure { services: Vec<String> },
}

pub struct HealthChecker<'a> {
    shell: &'a HostShell,
    critical_substrings: Vec<String>,
    flavor: CliFlavor,
}

impl<'a> HealthChecker<'a> {
    pub fn new(shell: &'a HostShell, flavor: CliFlavor) -> Self {
        Self {
            shell,
            critical_substrings: DEFAULT_CRITICAL_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
            flavor,
        }
    }

    pub fn with_critical_substrings(shell: &'a HostShell, flavor: CliFlavor, substrings: Vec<String>) -> Self {
        Self {
            shell,
            critical_substrings: substrings,
            flavor,
        }
    }

    pub async fn check(&self, files: &[String], cwd: &str) -> Result<HealthSnapshot, HealthError> {
        let file_flags: String = files
            .iter()
            .map(|f| format!("-f {}", crate::host::exec::shell_quote(f)))
            .collect::<Vec<_>>()
            .join(" ");
        let prefix = self.flavor.prefix();

        let services_out = self
            .shell
            .exec(&format!("{} {} config --services", prefix, file_flags), Some(cwd), None)
            .await
            .map_err(|e| HealthError::Unhealthy(vec![format!("failed to enumerate services: {}", e)]))?;

        let services: Vec<String> = services_out.stdout.lines().map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();

        let mut unhealthy = Vec::new();
        for service in &services {
            let ps_out = self
                .shell
                .exec(
                    &format!("{} {} ps --format json {}", prefix, file_flags, crate::host::exec::shell_quote(service)),
                    Some(cwd),
                    None,
                )
                .await
                .map_err(|e| HealthError::Unhealthy(vec![format!("{}: {}", service, e)]))?;

            if !is_running(&ps_out.stdout) {
                unhealthy.push(service.clone());
            }
        }

        if unhealthy.is_empty() {
            return Ok(HealthSnapshot::AllHealthy);
        }

        let critical: Vec<String> = unhealthy
            .iter()
            .filter(|name| {
                let lower = name.to_lowercase();
                self.critical_substrings.iter().any(|s| lower.contains(s.as_str()))
            })
            .cloned()
            .collect();

        if !critical.is_empty() {
            Ok(HealthSnapshot::CriticalFailure { services: critical })
        } else {
            Ok(HealthSnapshot::Unhealthy { services: unhealthy })
        }
    }
}

/// A service is healthy iff its reported state is `running`, matched
/// case-insensitively against `docker compose ps --format json`'s output.
fn is_running(ps_stdout: &str) -> bool {
    let trimmed = ps_stdout.trim();
    if trimmed.is_empty() {
        return false;
    }

    let value: serde_json::Value = if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            Ok(mut arr) if !arr.is_empty() => arr.remove(0),
            _ => return false,
        }
    } else {
        match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return false,
        }
    };

    value
        .get("State")
        .or_else(|| value.get("Status"))
        .and_then(|s| s.as_str())
        .map(|s| s.to_lowercase().contains("running"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_running_state() {
        assert!(is_running(r#"{"State": "running"}"#));
        assert!(is_running(r#"{"Status": "Running"}"#));
    }

    #[test]
    fn rejects_exited_or_empty() {
        assert!(!is_running(r#"{"State": "exited"}"#));
        assert!(!is_running(""));
        assert!(!is_running("not json"));
    }

    #[test]
    fn classifies_critical_by_name_substring() {
        let checker_substrings = DEFAULT_CRITICAL_SUBSTRINGS;
        assert!(checker_substrings.contains(&"database"));
        assert!(checker_substrings.contains(&"api"));
        assert!(!checker_substrings.contains(&"worker"));
    }
}
