//! UpdateOrchestrator (C9) + VersionCheck (C10): the state machine that
//! sequences one package's update, with rollback branches, and serializes
//! all updates behind a single process-wide mutex.

pub mod events;
pub mod result;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backup::{BackupDriver, ScriptKind};
use crate::compose::{ComposeDriver, ComposeProjectStatus};
use crate::health::{HealthChecker, HealthSnapshot};
use crate::host::HostShell;
use crate::migration::MigrationEngine;
use crate::package::{PackageConfig, PackageRegistry};
use crate::repo::RepositoryManager;
use crate::state::{DeploymentState, DeploymentStateStore};
use crate::version::Version;

use events::{health_snapshot_summary, EventSink, UpdateEvent};
use result::{UpdateOutcome, UpdateResult, VersionCheckResult};

/// Non-blocking contention window per spec §4.9: a caller that cannot
/// acquire the update mutex within this window gets an immediate
/// "already in progress" result rather than waiting behind it.
const MUTEX_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct UpdateOrchestrator<'a> {
    shell: &'a HostShell,
    registry: &'a PackageRegistry,
    sink: Arc<dyn EventSink>,
    update_lock: Mutex<()>,
    /// The package name identifying the controller's own deployment; its
    /// update follows the self-update isolation rules (§4.9, §5).
    self_package_name: Option<String>,
    /// Last observed project-level status snapshot, used to emit
    /// `PackageStatusChanged` only on an actual diff (including removal).
    last_status: Mutex<HashMap<String, ComposeProjectStatus>>,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(shell: &'a HostShell, registry: &'a PackageRegistry, sink: Arc<dyn EventSink>, self_package_name: Option<String>) -> Self {
        Self {
            shell,
            registry,
            sink,
            update_lock: Mutex::new(()),
            self_package_name,
            last_status: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh every compose project's status via `compose ls` and publish
    /// `PackageStatusChanged` for each project whose status differs from the
    /// last observed snapshot, including one that disappeared entirely.
    pub async fn refresh_status(&self) -> Result<HashMap<String, ComposeProjectStatus>, String> {
        let compose = ComposeDriver::new(self.shell);
        let current = compose.status_map().await.map_err(|e| e.to_string())?;

        let mut cache = self.last_status.lock().await;
        let changes = ComposeDriver::diff_status(&cache, &current);
        *cache = current.clone();
        drop(cache);

        for change in changes {
            self.sink
                .publish(UpdateEvent::PackageStatusChanged {
                    package: change.package,
                    new_status: change.to,
                    old_status: change.from,
                })
                .await;
        }

        Ok(current)
    }

    /// Convenience lookup: refresh and return a single package's status.
    pub async fn status_for(&self, name: &str) -> Result<Option<ComposeProjectStatus>, String> {
        let pkg = self.registry.get(name).ok_or_else(|| format!("unknown package '{}'", name))?;
        let all = self.refresh_status().await?;
        Ok(all.get(&pkg.name).cloned())
    }

    fn is_self_update(&self, pkg: &PackageConfig) -> bool {
        self.self_package_name.as_deref() == Some(pkg.name.as_str())
    }

    pub async fn check_for_updates(&self, name: &str) -> Result<VersionCheckResult, String> {
        let pkg = self.registry.get(name).ok_or_else(|| format!("unknown package '{}'", name))?;
        self.check_for_updates_pkg(&pkg).await
    }

    async fn check_for_updates_pkg(&self, pkg: &PackageConfig) -> Result<VersionCheckResult, String> {
        let repo = RepositoryManager::new(self.shell);
        let state_store = DeploymentStateStore::new(self.shell);

        let current = state_store.current_version(&pkg.local_repo_path).await;

        if repo.is_repository(&pkg.local_repo_path).await.unwrap_or(false) {
            let _ = repo.fetch(&pkg.local_repo_path).await;
        }

        let versions = repo
            .available_versions(&pkg.local_repo_path)
            .await
            .map_err(|e| e.to_string())?;
        let latest = versions.first().cloned();

        let current_parsed = current.as_deref().and_then(Version::parse);
        let upgrade_available = match (&latest, &current_parsed) {
            (Some(_), None) => true,
            (Some(l), Some(c)) => l > c,
            (None, _) => false,
        };

        self.sink
            .publish(UpdateEvent::VersionCheckCompleted {
                package: pkg.name.clone(),
                current: current.clone(),
                latest: latest.as_ref().map(|v| v.friendly().to_string()),
                upgrade_available,
            })
            .await;

        Ok(VersionCheckResult {
            current,
            latest: latest.map(|v| v.friendly().to_string()),
            upgrade_available,
        })
    }

    /// Update a single package, blocking on the global mutex for at most
    /// `MUTEX_ACQUIRE_TIMEOUT` before giving up.
    pub async fn update(&self, name: &str) -> Result<UpdateResult, String> {
        let pkg = self.registry.get(name).ok_or_else(|| format!("unknown package '{}'", name))?;

        let _guard = match tokio::time::timeout(MUTEX_ACQUIRE_TIMEOUT, self.update_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Ok(UpdateResult::already_in_progress()),
        };

        Ok(self.run_update(&pkg).await)
    }

    /// Iterate the registry in order; stop iterating if a package's result
    /// is `RestartPending` (the self-update case) — the controller expects
    /// to be replaced by a new instance.
    pub async fn update_all(&self) -> Vec<(String, UpdateResult)> {
        let mut results = Vec::new();
        for pkg in self.registry.list() {
            let result = self.update(&pkg.name).await.unwrap_or_else(|e| UpdateResult::fatal(None, e));
            let restart_pending = result.outcome == UpdateOutcome::RestartPending;
            results.push((pkg.name.clone(), result));
            if restart_pending {
                info!(package = %pkg.name, "self-update in progress, stopping updateAll iteration");
                break;
            }
        }
        results
    }

    async fn progress(&self, pkg: &PackageConfig, phase: &str, percent: u8) {
        self.sink
            .publish(UpdateEvent::UpdateProgress {
                package: pkg.name.clone(),
                phase: phase.to_string(),
                percent,
            })
            .await;
    }

    async fn run_update(&self, pkg: &PackageConfig) -> UpdateResult {
        let dir = pkg.compose_folder_path();
        let self_update = self.is_self_update(pkg);

        let repo = RepositoryManager::new(self.shell);
        let compose = ComposeDriver::new(self.shell);
        let migrations = MigrationEngine::new(self.shell);
        let backups = BackupDriver::new(self.shell);
        let state_store = DeploymentStateStore::new(self.shell);

        // --- LoadState ---
        let prior_state = state_store.read(&dir).await;
        let from_version_str = prior_state.as_ref().map(|s| s.version.clone());
        let from_version = from_version_str.as_deref().and_then(Version::parse);
        let applied_before: HashSet<Version> = prior_state.as_ref().map(|s| s.applied_versions().into_iter().collect()).unwrap_or_default();

        let flavor = match compose.detect_cli().await {
            Ok(f) => f,
            Err(e) => return UpdateResult::fatal(from_version_str, e.to_string()),
        };
        let health = HealthChecker::new(self.shell, flavor);

        // --- PrepareRepo ---
        self.progress(pkg, "PrepareRepo", 5).await;
        if let Err(e) = self.prepare_repo(&repo, pkg).await {
            return UpdateResult::fatal(from_version_str, e.to_string());
        }

        // --- Fetch ---
        self.progress(pkg, "Fetch", 15).await;
        if let Err(e) = repo.fetch(&pkg.local_repo_path).await {
            return UpdateResult::fatal(from_version_str, e.to_string());
        }

        // --- SelectVersion ---
        let versions = match repo.available_versions(&pkg.local_repo_path).await {
            Ok(v) => v,
            Err(e) => return UpdateResult::fatal(from_version_str, e.to_string()),
        };

        let target = match versions.first() {
            Some(v) => v.clone(),
            None => return UpdateResult::no_op_success(from_version_str),
        };

        if Some(&target) == from_version.as_ref() {
            return UpdateResult::no_op_success(from_version_str);
        }

        self.sink
            .publish(UpdateEvent::UpdateStarted {
                package: pkg.name.clone(),
                from: from_version_str.clone(),
                to: target.friendly().to_string(),
            })
            .await;

        // --- CheckoutTarget ---
        self.progress(pkg, "CheckoutTarget", 25).await;
        if let Err(e) = repo.checkout(&pkg.local_repo_path, target.friendly()).await {
            return UpdateResult::fatal(from_version_str, e.to_string());
        }

        let arch = match self.shell.architecture().await {
            Ok(a) => a,
            Err(e) => return UpdateResult::fatal(from_version_str, e.to_string()),
        };
        let files = match compose.select_compose_files(&dir, arch).await {
            Ok(f) => f,
            Err(e) => return UpdateResult::fatal(from_version_str, e.to_string()),
        };

        // --- Backup? ---
        self.progress(pkg, "Backup", 35).await;
        let mut backup_file = None;
        if backups.script_exists(ScriptKind::Backup, &dir).await {
            match backups.create(&dir, Some(target.friendly())).await {
                Ok(file) => backup_file = Some(file),
                Err(e) => {
                    // Fatal: refuse to proceed without a safety net.
                    return UpdateResult::fatal(from_version_str, format!("backup failed: {}", e));
                }
            }
        }

        // --- StopServices (skipped for self-update) ---
        self.progress(pkg, "StopServices", 45).await;
        if !self_update {
            if let Err(e) = compose.down(&files, &dir).await {
                return self
                    .rollback(
                        pkg,
                        &dir,
                        &files,
                        &migrations,
                        &backups,
                        &compose,
                        from_version_str.clone(),
                        target.friendly().to_string(),
                        &[],
                        backup_file,
                        format!("stop failed: {}", e),
                    )
                    .await;
            }
        }

        // --- RunUpMigrations ---
        self.progress(pkg, "RunUpMigrations", 55).await;
        let all_scripts = match migrations.discover(&dir).await {
            Ok(s) => s,
            Err(e) => {
                return self
                    .rollback(
                        pkg,
                        &dir,
                        &files,
                        &migrations,
                        &backups,
                        &compose,
                        from_version_str.clone(),
                        target.friendly().to_string(),
                        &[],
                        backup_file,
                        e.to_string(),
                    )
                    .await
            }
        };
        let up_scripts = MigrationEngine::filter(&all_scripts, from_version.as_ref(), &target, &applied_before);

        let executed = match migrations.execute(&up_scripts, &dir).await {
            Ok(done) => done,
            Err((done, e)) => {
                return self
                    .rollback(
                        pkg,
                        &dir,
                        &files,
                        &migrations,
                        &backups,
                        &compose,
                        from_version_str.clone(),
                        target.friendly().to_string(),
                        &done,
                        backup_file,
                        e.to_string(),
                    )
                    .await
            }
        };

        // --- StartServices / Restart-bg ---
        self.progress(pkg, "StartServices", 75).await;
        let start_result = if self_update {
            compose.restart(&files, &dir, true).await
        } else {
            compose.up(&files, &dir).await
        };

        if let Err(e) = start_result {
            return self
                .rollback(
                    pkg,
                    &dir,
                    &files,
                    &migrations,
                    &backups,
                    &compose,
                    from_version_str.clone(),
                    target.friendly().to_string(),
                    &executed,
                    backup_file,
                    e.to_string(),
                )
                .await;
        }

        if self_update {
            self.persist(&state_store, &dir, &target, &applied_before, &executed, prior_state.as_ref()).await;
            self.sink
                .publish(UpdateEvent::UpdateCompleted {
                    package: pkg.name.clone(),
                    from: from_version_str.clone(),
                    to: target.friendly().to_string(),
                    success: true,
                    error: None,
                    scripts: executed.iter().map(|v| v.friendly().to_string()).collect(),
                })
                .await;
            return UpdateResult {
                outcome: UpdateOutcome::RestartPending,
                from_version: from_version_str,
                to_version: Some(target.friendly().to_string()),
                executed_scripts: executed.iter().map(|v| v.friendly().to_string()).collect(),
                health_snapshot: None,
                backup_file,
                recovery_performed: false,
                error_message: None,
            };
        }

        // --- HealthCheck ---
        self.progress(pkg, "HealthCheck", 90).await;
        let snapshot = match health.check(&files, &dir).await {
            Ok(s) => s,
            Err(e) => {
                return self
                    .rollback(
                        pkg,
                        &dir,
                        &files,
                        &migrations,
                        &backups,
                        &compose,
                        from_version_str.clone(),
                        target.friendly().to_string(),
                        &executed,
                        backup_file,
                        e.to_string(),
                    )
                    .await
            }
        };

        match &snapshot {
            HealthSnapshot::CriticalFailure { .. } => {
                self.rollback(
                    pkg,
                    &dir,
                    &files,
                    &migrations,
                    &backups,
                    &compose,
                    from_version_str.clone(),
                    target.friendly().to_string(),
                    &executed,
                    backup_file,
                    health_snapshot_summary(&snapshot),
                )
                .await
            }
            HealthSnapshot::Unhealthy { .. } => {
                self.persist(&state_store, &dir, &target, &applied_before, &executed, prior_state.as_ref()).await;
                self.complete(pkg, from_version_str.clone(), &target, &executed, true, None).await;
                let summary = health_snapshot_summary(&snapshot);
                UpdateResult {
                    outcome: UpdateOutcome::PartialSuccess,
                    from_version: from_version_str,
                    to_version: Some(target.friendly().to_string()),
                    executed_scripts: executed.iter().map(|v| v.friendly().to_string()).collect(),
                    health_snapshot: Some(snapshot),
                    backup_file,
                    recovery_performed: false,
                    error_message: Some(summary),
                }
            }
            HealthSnapshot::AllHealthy => {
                self.persist(&state_store, &dir, &target, &applied_before, &executed, prior_state.as_ref()).await;
                self.complete(pkg, from_version_str.clone(), &target, &executed, true, None).await;
                UpdateResult {
                    outcome: UpdateOutcome::Success,
                    from_version: from_version_str,
                    to_version: Some(target.friendly().to_string()),
                    executed_scripts: executed.iter().map(|v| v.friendly().to_string()).collect(),
                    health_snapshot: Some(snapshot),
                    backup_file,
                    recovery_performed: false,
                    error_message: None,
                }
            }
        }
    }

    async fn prepare_repo(&self, repo: &RepositoryManager<'_>, pkg: &PackageConfig) -> Result<(), crate::error::RepositoryError> {
        if repo.is_repository(&pkg.local_repo_path).await? {
            return Ok(());
        }

        let has_contents = !self
            .shell
            .list_files(&pkg.local_repo_path, "*")
            .await
            .map(|v| v.is_empty())
            .unwrap_or(true);

        if has_contents {
            repo.init_in_place(&pkg.local_repo_path, &pkg.repository_url).await
        } else {
            repo.clone(&pkg.repository_url, &pkg.local_repo_path).await
        }
    }

    async fn persist(
        &self,
        state_store: &DeploymentStateStore<'_>,
        dir: &str,
        target: &Version,
        applied_before: &HashSet<Version>,
        executed: &[Version],
        prior_state: Option<&DeploymentState>,
    ) {
        let mut applied: std::collections::BTreeSet<String> = applied_before.iter().map(|v| v.friendly().to_string()).collect();
        applied.extend(executed.iter().map(|v| v.friendly().to_string()));

        let new_state = DeploymentState {
            version: target.friendly().to_string(),
            updated_at: chrono::Utc::now(),
            applied,
            failed: prior_state.map(|s| s.failed.clone()).unwrap_or_default(),
        };

        if let Err(e) = state_store.write(dir, &new_state).await {
            warn!(error = %e, "failed to persist deployment state; next run will re-evaluate");
        }
    }

    async fn complete(&self, pkg: &PackageConfig, from: Option<String>, target: &Version, executed: &[Version], success: bool, error: Option<String>) {
        self.sink
            .publish(UpdateEvent::UpdateCompleted {
                package: pkg.name.clone(),
                from,
                to: target.friendly().to_string(),
                success,
                error,
                scripts: executed.iter().map(|v| v.friendly().to_string()).collect(),
            })
            .await;
    }

    /// Stop → Down-scripts (descending) → Restore → Up. The final outcome
    /// is `Failed` with `recoveryPerformed=true` if restore succeeds, else
    /// `RecoverableFailure` pointing at the backup for manual intervention.
    #[allow(clippy::too_many_arguments)]
    async fn rollback(
        &self,
        pkg: &PackageConfig,
        dir: &str,
        files: &[String],
        migrations: &MigrationEngine<'_>,
        backups: &BackupDriver<'_>,
        compose: &ComposeDriver<'_>,
        from_version: Option<String>,
        to_version: String,
        executed_this_attempt: &[Version],
        backup_file: Option<String>,
        reason: String,
    ) -> UpdateResult {
        warn!(package = %pkg.name, reason = %reason, "rolling back update");

        if let Err(e) = compose.down(files, dir).await {
            warn!(package = %pkg.name, error = %e, "rollback: stop failed, continuing anyway");
        }

        if let Ok(all) = migrations.discover(dir).await {
            let executed_set: HashSet<Version> = executed_this_attempt.iter().cloned().collect();
            let down_scripts: Vec<_> = all
                .into_iter()
                .filter(|s| s.direction == crate::migration::Direction::Down)
                .filter(|s| executed_set.contains(&s.version))
                .collect();
            let mut down_scripts = down_scripts;
            down_scripts.sort_by(|a, b| b.version.cmp(&a.version));
            if let Err((_, e)) = migrations.execute(&down_scripts, dir).await {
                warn!(package = %pkg.name, error = %e, "rollback: a down-script failed, continuing anyway");
            }
        }

        let recovery_performed = match &backup_file {
            Some(file) => backups.restore(dir, file).await.is_ok(),
            None => false,
        };

        if let Err(e) = compose.up(files, dir).await {
            warn!(package = %pkg.name, error = %e, "rollback: restart of prior stack failed");
        }

        let target_version = Version::parse(&to_version).unwrap_or_else(|| Version::parse("0.0.0").expect("static fallback version parses"));
        self.complete(pkg, from_version.clone(), &target_version, &[], false, Some(reason.clone())).await;

        UpdateResult {
            outcome: if recovery_performed {
                UpdateOutcome::Failed
            } else {
                UpdateOutcome::RecoverableFailure
            },
            from_version,
            to_version: None,
            executed_scripts: Vec::new(),
            health_snapshot: None,
            backup_file,
            recovery_performed,
            error_message: Some(reason),
        }
    }
}
