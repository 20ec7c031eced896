//! MigrationEngine (C4): discover versioned up/down scripts, filter them
//! for a given transition, and execute them exactly once per version.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use crate::error::MigrationError;
use crate::host::HostShell;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub file_name: String,
    pub absolute_path: String,
    pub version: Version,
    pub direction: Direction,
}

fn grammar() -> Regex {
    Regex::new(r"^(up|down)-(\d+(?:\.\d+){1,3})\.sh$").expect("static migration grammar is valid")
}

pub struct MigrationEngine<'a> {
    shell: &'a HostShell,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(shell: &'a HostShell) -> Self {
        Self { shell }
    }

    /// Discover `up-X.Y.Z.sh` / `down-X.Y.Z.sh` in `dir`, sorted ascending
    /// by `(version, direction)`. Files that don't match the grammar or
    /// carry an unparseable version are logged and skipped. Two files for
    /// the same `(version, direction)` are a conflict: the first
    /// discovered wins, the rest are logged and dropped.
    pub async fn discover(&self, dir: &str) -> Result<Vec<MigrationScript>, MigrationError> {
        let entries = self
            .shell
            .list_files(dir, "*-*.sh")
            .await
            .map_err(|e| MigrationError {
                script: dir.to_string(),
                version: String::new(),
                detail: e.to_string(),
            })?;

        let pattern = grammar();
        let mut seen = HashSet::new();
        let mut scripts = Vec::with_capacity(entries.len());

        for path in entries {
            let file_name = match path.rsplit('/').next() {
                Some(n) => n.to_string(),
                None => continue,
            };

            let caps = match pattern.captures(&file_name) {
                Some(c) => c,
                None => {
                    warn!(file = %file_name, "migration script does not match naming grammar, skipping");
                    continue;
                }
            };

            let direction = match &caps[1] {
                "up" => Direction::Up,
                "down" => Direction::Down,
                other => {
                    warn!(file = %file_name, direction = other, "unknown migration direction, skipping");
                    continue;
                }
            };

            let version = match Version::parse(&caps[2]) {
                Some(v) => v,
                None => {
                    warn!(file = %file_name, "unparseable migration version, skipping");
                    continue;
                }
            };

            let key = (version.numeric(), direction);
            if !seen.insert(key) {
                warn!(file = %file_name, "duplicate migration script for this version/direction, keeping first discovered");
                continue;
            }

            scripts.push(MigrationScript {
                file_name,
                absolute_path: path,
                version,
                direction,
            });
        }

        scripts.sort_by(|a, b| a.version.cmp(&b.version).then(a.direction.cmp(&b.direction)));
        Ok(scripts)
    }

    /// Select the scripts needed to move from `from` to `target`, excluding
    /// `excluded` (the already-applied set). See spec §4.4 for the three
    /// branches.
    pub fn filter(
        all: &[MigrationScript],
        from: Option<&Version>,
        target: &Version,
        excluded: &HashSet<Version>,
    ) -> Vec<MigrationScript> {
        let forward = match from {
            None => true,
            Some(f) => target > f,
        };

        if forward {
            let mut ups: Vec<MigrationScript> = all
                .iter()
                .filter(|s| s.direction == Direction::Up)
                .filter(|s| &s.version <= target)
                .filter(|s| from.map(|f| &s.version > f).unwrap_or(true))
                .filter(|s| !excluded.contains(&s.version))
                .cloned()
                .collect();
            ups.sort_by(|a, b| a.version.cmp(&b.version));
            return ups;
        }

        let from = match from {
            Some(f) => f,
            None => return Vec::new(),
        };

        if target == from {
            return Vec::new();
        }

        let mut downs: Vec<MigrationScript> = all
            .iter()
            .filter(|s| s.direction == Direction::Down)
            .filter(|s| &s.version > target && &s.version <= from)
            .filter(|s| excluded.contains(&s.version))
            .cloned()
            .collect();
        downs.sort_by(|a, b| b.version.cmp(&a.version));
        downs
    }

    /// Run each script as `sudo bash "<path>"` in `cwd`, stopping at the
    /// first failure. On success, returns every version that ran, in
    /// execution order. On failure, the error carries the prefix that
    /// *did* complete before the failing script, so a caller rolling back
    /// can undo exactly what this attempt actually applied.
    pub async fn execute(&self, scripts: &[MigrationScript], cwd: &str) -> Result<Vec<Version>, (Vec<Version>, MigrationError)> {
        let mut completed = Vec::with_capacity(scripts.len());
        for script in scripts {
            let cmd = format!("sudo bash {}", crate::host::exec::shell_quote(&script.absolute_path));
            let out = self.shell.exec(&cmd, Some(cwd), None).await.map_err(|e| {
                (
                    completed.clone(),
                    MigrationError {
                        script: script.file_name.clone(),
                        version: script.version.to_string(),
                        detail: e.to_string(),
                    },
                )
            })?;

            if !out.success() {
                return Err((
                    completed.clone(),
                    MigrationError {
                        script: script.file_name.clone(),
                        version: script.version.to_string(),
                        detail: format!(
                            "exit {}: stdout: {} stderr: {}",
                            out.exit_code,
                            out.stdout.trim(),
                            out.stderr.trim()
                        ),
                    },
                ));
            }

            completed.push(script.version.clone());
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(version: &str, direction: Direction) -> MigrationScript {
        MigrationScript {
            file_name: format!("{}-{}.sh", if direction == Direction::Up { "up" } else { "down" }, version),
            absolute_path: format!("/app/{}-{}.sh", if direction == Direction::Up { "up" } else { "down" }, version),
            version: Version::parse(version).unwrap(),
            direction,
        }
    }

    #[test]
    fn forward_filter_excludes_applied_and_out_of_range() {
        let all = vec![
            script("1.0.1", Direction::Up),
            script("1.1.0", Direction::Up),
            script("1.2.0", Direction::Up),
            script("1.3.0", Direction::Up),
        ];
        let from = Version::parse("1.0.0").unwrap();
        let target = Version::parse("1.2.0").unwrap();
        let excluded = HashSet::new();

        let selected = MigrationEngine::filter(&all, Some(&from), &target, &excluded);
        let names: Vec<&str> = selected.iter().map(|s| s.version.friendly()).collect();
        assert_eq!(names, vec!["1.0.1", "1.1.0", "1.2.0"]);
    }

    #[test]
    fn forward_filter_skips_already_applied() {
        let all = vec![script("1.0.1", Direction::Up), script("1.1.0", Direction::Up)];
        let from = Version::parse("1.0.0").unwrap();
        let target = Version::parse("1.1.0").unwrap();
        let mut excluded = HashSet::new();
        excluded.insert(Version::parse("1.0.1").unwrap());

        let selected = MigrationEngine::filter(&all, Some(&from), &target, &excluded);
        let names: Vec<&str> = selected.iter().map(|s| s.version.friendly()).collect();
        assert_eq!(names, vec!["1.1.0"]);
    }

    #[test]
    fn rollback_filter_only_undoes_applied_versions_descending() {
        let all = vec![
            script("1.1.0", Direction::Down),
            script("1.2.0", Direction::Down),
        ];
        let from = Version::parse("1.2.0").unwrap();
        let target = Version::parse("1.0.0").unwrap();
        let mut excluded = HashSet::new();
        excluded.insert(Version::parse("1.2.0").unwrap());

        let selected = MigrationEngine::filter(&all, Some(&from), &target, &excluded);
        let names: Vec<&str> = selected.iter().map(|s| s.version.friendly()).collect();
        // 1.1.0 was never applied (not in excluded), so only 1.2.0 is undone.
        assert_eq!(names, vec!["1.2.0"]);
    }

    #[test]
    fn same_version_yields_no_scripts() {
        let all = vec![script("1.0.0", Direction::Up)];
        let v = Version::parse("1.0.0").unwrap();
        let excluded = HashSet::new();
        assert!(MigrationEngine::filter(&all, Some(&v), &v, &excluded).is_empty());
    }

    #[test]
    fn discover_sorts_ascending_by_version_then_direction() {
        let mut scripts = vec![
            script("1.2.0", Direction::Down),
            script("1.0.1", Direction::Up),
            script("1.2.0", Direction::Up),
        ];
        scripts.sort_by(|a, b| a.version.cmp(&b.version).then(a.direction.cmp(&b.direction)));
        let ordered: Vec<(&str, Direction)> = scripts.iter().map(|s| (s.version.friendly(), s.direction)).collect();
        assert_eq!(
            ordered,
            vec![("1.0.1", Direction::Up), ("1.2.0", Direction::Up), ("1.2.0", Direction::Down)]
        );
    }
}
