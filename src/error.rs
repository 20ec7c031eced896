use thiserror::Error;

/// Cannot reach the host. Terminal at startup, retried/rolled-back mid-update.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {user}@{host}: {source}")]
    Connect {
        user: String,
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command execution failed on {host}: {source}")]
    Exec {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("connectivity self-test failed on {host}")]
    SelfTestFailed { host: String },

    #[error("unrecognized architecture reported by uname -m: '{0}'")]
    UnknownArchitecture(String),
}

/// Clone/fetch/checkout failures. Abort the update before any mutation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("'{0}' already exists, refusing to clone into it")]
    DestinationExists(String),

    #[error("no tag matching '{friendly}' or 'v{friendly}' found in {path}")]
    TagNotFound { friendly: String, path: String },

    #[error("'{0}' is not a git working copy")]
    NotARepository(String),
}

/// A migration script returned non-zero. Triggers rollback.
#[derive(Debug, Error)]
#[error("migration script '{script}' (version {version}) failed: {detail}")]
pub struct MigrationError {
    pub script: String,
    pub version: String,
    pub detail: String,
}

/// backup.sh present but returned failure. Fatal for the attempt (no rollback
/// has a safety net to roll back onto).
#[derive(Debug, Error)]
#[error("backup creation failed: {0}")]
pub struct BackupError(pub String);

/// Rollback's restore.sh failed. Outcome becomes RecoverableFailure.
#[derive(Debug, Error)]
#[error("restore failed: {0}")]
pub struct RestoreError(pub String);

/// down/up/pull failed. Treated like MigrationError for rollback policy.
#[derive(Debug, Error)]
#[error("compose command failed: {0}")]
pub struct ComposeError(pub String);

/// Services not healthy.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("service(s) unhealthy: {0:?}")]
    Unhealthy(Vec<String>),

    #[error("critical service(s) unhealthy: {0:?}")]
    Critical(Vec<String>),
}

/// Could not persist DeploymentState. Logged; does not fail an otherwise
/// healthy update (the next run re-evaluates from whatever is on disk).
#[derive(Debug, Error)]
#[error("failed to persist deployment state: {0}")]
pub struct StateError(pub String);

/// Top-level error used wherever a component boundary needs one shape.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    State(#[from] StateError),
}
