//! Lifecycle events published to an external sink (UI, metrics, logs).
//! Delivery is best-effort; the orchestrator never blocks on a slow sink.

use crate::health::HealthSnapshot;

#[derive(Debug, Clone)]
pub enum UpdateEvent {
    UpdateStarted {
        package: String,
        from: Option<String>,
        to: String,
    },
    UpdateProgress {
        package: String,
        phase: String,
        percent: u8,
    },
    UpdateCompleted {
        package: String,
        from: Option<String>,
        to: String,
        success: bool,
        error: Option<String>,
        scripts: Vec<String>,
    },
    VersionCheckCompleted {
        package: String,
        current: Option<String>,
        latest: Option<String>,
        upgrade_available: bool,
    },
    PackageStatusChanged {
        package: String,
        new_status: String,
        old_status: Option<String>,
    },
}

/// External consumer of orchestrator events. Implementations MUST NOT
/// block the caller for any appreciable time — the orchestrator awaits
/// `publish` inline between phases.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: UpdateEvent);
}

/// Default sink: logs every event via `tracing`, matching the rest of the
/// host-facing components' observability story.
pub struct TracingEventSink;

#[async_trait::async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: UpdateEvent) {
        match event {
            UpdateEvent::UpdateStarted { package, from, to } => {
                tracing::info!(package = %package, from = ?from, to = %to, "update started");
            }
            UpdateEvent::UpdateProgress { package, phase, percent } => {
                tracing::debug!(package = %package, phase = %phase, percent, "update progress");
            }
            UpdateEvent::UpdateCompleted { package, success, error, .. } => {
                if success {
                    tracing::info!(package = %package, "update completed");
                } else {
                    tracing::warn!(package = %package, error = ?error, "update completed with failure");
                }
            }
            UpdateEvent::VersionCheckCompleted {
                package,
                current,
                latest,
                upgrade_available,
            } => {
                tracing::info!(package = %package, current = ?current, latest = ?latest, upgrade_available, "version check completed");
            }
            UpdateEvent::PackageStatusChanged {
                package,
                new_status,
                old_status,
            } => {
                tracing::info!(package = %package, new_status = %new_status, old_status = ?old_status, "package status changed");
            }
        }
    }
}

pub fn health_snapshot_summary(snapshot: &HealthSnapshot) -> String {
    match snapshot {
        HealthSnapshot::AllHealthy => "healthy".to_string(),
        HealthSnapshot::Unhealthy { services } => format!("unhealthy: {}", services.join(", ")),
        HealthSnapshot::CriticalFailure { services } => format!("critical failure: {}", services.join(", ")),
    }
}
