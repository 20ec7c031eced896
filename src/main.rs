mod backup;
mod cli;
mod compose;
mod config;
mod error;
mod health;
mod host;
mod migration;
mod orchestrator;
mod output;
mod package;
mod repo;
mod state;
mod version;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use backup::BackupDriver;
use cli::{Cli, Command};
use orchestrator::events::TracingEventSink;
use orchestrator::UpdateOrchestrator;
use package::{PackageConfig, PackageRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .without_time()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

fn build_registry(config: &config::Config) -> PackageRegistry {
    let registry = PackageRegistry::new();
    let to_packages = |entries: &[config::PackageEntry]| -> Vec<PackageConfig> {
        entries
            .iter()
            .map(|e| {
                let mut pkg = PackageConfig::new(e.repository_url.clone(), e.local_repo_path.clone(), Some(e.compose_subdir.clone()));
                pkg.registry_url = e.registry_url.clone();
                pkg.docker_auth = config.docker_auth.get(&pkg.name).cloned();
                pkg
            })
            .collect()
    };
    registry.reload(to_packages(&config.std_packages), to_packages(&config.packages));
    registry
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::Config::load(&cli.config).context("loading controller configuration")?;
    let registry = build_registry(&config);

    let shell = host::HostShell::connect(&config.host_shell_config())
        .await
        .context("connecting to host")?;

    let sink = Arc::new(TracingEventSink);
    let orchestrator = UpdateOrchestrator::new(&shell, &registry, sink, config.self_package_name.clone());

    let exit = match cli.command {
        Command::Update { name } => {
            let result = orchestrator.update(&name).await.map_err(anyhow::Error::msg)?;
            report_update(&name, &result);
            ExitCode::from(result.exit_code() as u8)
        }
        Command::UpdateAll => {
            let results = orchestrator.update_all().await;
            let mut worst = 0i32;
            for (name, result) in &results {
                report_update(name, result);
                worst = worst.max(result.exit_code());
            }
            ExitCode::from(worst as u8)
        }
        Command::Check { name } => {
            let result = orchestrator.check_for_updates(&name).await.map_err(anyhow::Error::msg)?;
            output::info(&format!(
                "{}: current={} latest={} upgrade_available={}",
                name,
                result.current.as_deref().unwrap_or("none"),
                result.latest.as_deref().unwrap_or("none"),
                result.upgrade_available
            ));
            ExitCode::from(0)
        }
        Command::Packages => {
            for pkg in registry.list() {
                output::info(&format!("{} -> {} ({})", pkg.name, pkg.repository_url, pkg.compose_folder_path()));
            }
            ExitCode::from(0)
        }
        Command::Backups { name } => {
            let pkg = registry.get(&name).with_context(|| format!("unknown package '{}'", name))?;
            let backups = BackupDriver::new(&shell);
            let records = backups.list(&pkg.compose_folder_path()).await.map_err(|e| anyhow::anyhow!(e))?;
            for record in records {
                output::info(&format!(
                    "{} ({} bytes, created {})",
                    record.display_name, record.size_bytes, record.created_at
                ));
            }
            ExitCode::from(0)
        }
        Command::Status { name } => {
            match orchestrator.status_for(&name).await.map_err(anyhow::Error::msg)? {
                Some(status) => output::info(&format!(
                    "{}: {} ({}/{} running, files: {})",
                    name,
                    status.status_string,
                    status.running_services,
                    status.total_services,
                    status.config_files.join(", ")
                )),
                None => output::info(&format!("{}: no compose project found", name)),
            }
            ExitCode::from(0)
        }
    };

    shell.close().await.ok();
    Ok(exit)
}

fn report_update(name: &str, result: &orchestrator::result::UpdateResult) {
    match result.outcome {
        orchestrator::result::UpdateOutcome::Success | orchestrator::result::UpdateOutcome::RestartPending => {
            output::success(&format!(
                "{}: {} -> {}",
                name,
                result.from_version.as_deref().unwrap_or("none"),
                result.to_version.as_deref().unwrap_or("none")
            ));
        }
        orchestrator::result::UpdateOutcome::PartialSuccess => {
            output::warning(&format!("{}: partial success ({})", name, result.error_message.as_deref().unwrap_or("")));
        }
        orchestrator::result::UpdateOutcome::Failed | orchestrator::result::UpdateOutcome::RecoverableFailure => {
            output::error(&format!("{}: {}", name, result.error_message.as_deref().unwrap_or("update failed")));
        }
    }
}
