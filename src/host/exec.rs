use anyhow::Context as _;
use tracing::debug;

use crate::error::ChannelError;

use super::HostShell;

/// Result of a single command execution. A non-zero exit is a normal,
/// representable outcome — not an error of the call itself.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl HostShell {
    /// `cd <working_dir> && <command>` in one shell invocation. Failure to
    /// establish/use the channel is a `ChannelError`; a non-zero exit is
    /// just a field on the returned `CommandOutput`.
    pub async fn exec(
        &self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Option<std::time::Duration>,
    ) -> Result<CommandOutput, ChannelError> {
        let full_command = match working_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
            None => command.to_string(),
        };

        debug!(host = %self.host, cmd = %full_command, "exec");

        let run = self.session.command("bash").arg("-c").arg(&full_command).output();

        let output = match timeout {
            Some(d) => tokio::time::timeout(d, run).await.map_err(|_| ChannelError::Exec {
                host: self.host.clone(),
                source: anyhow::anyhow!("command timed out after {:?}: {}", d, full_command),
            })?,
            None => run.await,
        }
        .with_context(|| format!("exec failed on {}: {}", self.host, full_command))
        .map_err(|e| ChannelError::Exec {
            host: self.host.clone(),
            source: e,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Exec and require success, returning trimmed stdout.
    pub async fn exec_ok(&self, command: &str) -> Result<String, ChannelError> {
        let out = self.exec(command, None, None).await?;
        if !out.success() {
            return Err(ChannelError::Exec {
                host: self.host.clone(),
                source: anyhow::anyhow!(
                    "command exited {}: {}\nstdout: {}\nstderr: {}",
                    out.exit_code,
                    command,
                    out.stdout.trim(),
                    out.stderr.trim()
                ),
            });
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Exec with `sudo bash -c '...'`, matching the non-elevated exec's
    /// success/failure contract.
    pub async fn sudo_exec(&self, command: &str) -> Result<String, ChannelError> {
        self.exec_ok(&format!("sudo bash -c {}", shell_quote(command))).await
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, ChannelError> {
        let out = self.exec(&format!("cat {}", shell_quote(path)), None, None).await?;
        if !out.success() {
            return Err(ChannelError::Exec {
                host: self.host.clone(),
                source: anyhow::anyhow!("failed to read {}: {}", path, out.stderr.trim()),
            });
        }
        Ok(out.stdout.into_bytes())
    }

    /// Write `content` to `path`. If a direct write is permitted, writes
    /// directly; otherwise stages under `/tmp`, copies the destination's
    /// mode+owner (if it exists), and atomically moves into place with
    /// elevated privilege. The temp file is always cleaned up.
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), ChannelError> {
        if self.can_write_directly(path).await {
            return self.write_file_direct(path, content).await;
        }
        self.write_file_elevated(path, content).await
    }

    async fn can_write_directly(&self, path: &str) -> bool {
        self.exec(
            &format!(
                "test -w {} 2>/dev/null || test ! -e {}",
                shell_quote(path),
                shell_quote(path)
            ),
            None,
            None,
        )
        .await
        .map(|o| o.success())
        .unwrap_or(false)
    }

    async fn write_file_direct(&self, path: &str, content: &[u8]) -> Result<(), ChannelError> {
        let cmd = format!(
            "cat > {} << 'AUTOUPDATER_EOF'\n{}\nAUTOUPDATER_EOF",
            shell_quote(path),
            String::from_utf8_lossy(content)
        );
        self.exec_ok(&cmd).await?;
        Ok(())
    }

    async fn write_file_elevated(&self, path: &str, content: &[u8]) -> Result<(), ChannelError> {
        let tmp_path = format!("/tmp/autoupdater-{}", temp_suffix());

        let result: Result<(), ChannelError> = async {
            let cmd = format!(
                "cat > {} << 'AUTOUPDATER_EOF'\n{}\nAUTOUPDATER_EOF",
                shell_quote(&tmp_path),
                String::from_utf8_lossy(content)
            );
            self.exec_ok(&cmd).await?;

            if self.path_exists(path).await? {
                let perms = self
                    .exec_ok(&format!("stat -c '%a:%U:%G' {}", shell_quote(path)))
                    .await?;
                if let Some((mode, owner, group)) = parse_stat_triplet(&perms) {
                    self.exec_ok(&format!("chmod {} {}", mode, shell_quote(&tmp_path))).await?;
                    self.exec_ok(&format!("sudo chown {}:{} {}", owner, group, shell_quote(&tmp_path)))
                        .await?;
                }
            }

            self.exec_ok(&format!("sudo mv -f {} {}", shell_quote(&tmp_path), shell_quote(path)))
                .await?;
            Ok(())
        }
        .await;

        // Clean up the staged file on every exit path, success or failure.
        let _ = self.exec(&format!("rm -f {}", shell_quote(&tmp_path)), None, None).await;

        result
    }

    /// Non-recursive, case-insensitive shell-glob file listing.
    pub async fn list_files(&self, dir: &str, glob: &str) -> Result<Vec<String>, ChannelError> {
        let out = self.exec(&format!("ls -1 {} 2>/dev/null", shell_quote(dir)), None, None).await?;
        if !out.success() {
            return Ok(Vec::new());
        }
        Ok(out
            .stdout
            .lines()
            .filter(|name| super::glob::matches(name, glob))
            .map(|name| format!("{}/{}", dir.trim_end_matches('/'), name))
            .collect())
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool, ChannelError> {
        self.test_path(path, "-f").await
    }

    pub async fn dir_exists(&self, path: &str) -> Result<bool, ChannelError> {
        self.test_path(path, "-d").await
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool, ChannelError> {
        self.test_path(path, "-e").await
    }

    pub async fn is_executable(&self, path: &str) -> Result<bool, ChannelError> {
        self.test_path(path, "-x").await
    }

    async fn test_path(&self, path: &str, flag: &str) -> Result<bool, ChannelError> {
        let out = self.exec(&format!("test {} {}", flag, shell_quote(path)), None, None).await?;
        Ok(out.success())
    }

    pub async fn mkdir_all(&self, path: &str) -> Result<(), ChannelError> {
        self.exec_ok(&format!("mkdir -p {}", shell_quote(path))).await?;
        Ok(())
    }

    pub async fn chmod_exec(&self, path: &str) -> Result<(), ChannelError> {
        self.exec_ok(&format!("chmod +x {}", shell_quote(path))).await?;
        Ok(())
    }
}

fn parse_stat_triplet(s: &str) -> Option<(String, String, String)> {
    let mut parts = s.trim().splitn(3, ':');
    let mode = parts.next()?.to_string();
    let owner = parts.next()?.to_string();
    let group = parts.next()?.to_string();
    Some((mode, owner, group))
}

/// A cheap, dependency-free unique suffix for staging temp file names.
fn temp_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{:x}-{:x}", nanos, std::process::id())
}

/// Single-quote a shell argument, escaping embedded single quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stat_triplet() {
        assert_eq!(
            parse_stat_triplet("644:root:root"),
            Some(("644".into(), "root".into(), "root".into()))
        );
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
