use crate::health::HealthSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success,
    PartialSuccess,
    Failed,
    RecoverableFailure,
    /// The self-update case: the controller replaced itself and `updateAll`
    /// must stop iterating rather than run the remaining packages.
    RestartPending,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub outcome: UpdateOutcome,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub executed_scripts: Vec<String>,
    pub health_snapshot: Option<HealthSnapshot>,
    pub backup_file: Option<String>,
    pub recovery_performed: bool,
    pub error_message: Option<String>,
}

impl UpdateResult {
    pub fn no_op_success(version: Option<String>) -> Self {
        Self {
            outcome: UpdateOutcome::Success,
            from_version: version.clone(),
            to_version: version,
            executed_scripts: Vec::new(),
            health_snapshot: None,
            backup_file: None,
            recovery_performed: false,
            error_message: None,
        }
    }

    pub fn already_in_progress() -> Self {
        Self {
            outcome: UpdateOutcome::Failed,
            from_version: None,
            to_version: None,
            executed_scripts: Vec::new(),
            health_snapshot: None,
            backup_file: None,
            recovery_performed: false,
            error_message: Some("Update already in progress".to_string()),
        }
    }

    pub fn fatal(from: Option<String>, message: impl Into<String>) -> Self {
        Self {
            outcome: UpdateOutcome::Failed,
            from_version: from,
            to_version: None,
            executed_scripts: Vec::new(),
            health_snapshot: None,
            backup_file: None,
            recovery_performed: false,
            error_message: Some(message.into()),
        }
    }

    /// Exit code mapping per the trigger interface: 0 success, 1 (handled
    /// at startup, not here), 2 failed without rollback, 3 rollback
    /// performed, 4 partial success.
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            UpdateOutcome::Success | UpdateOutcome::RestartPending => 0,
            UpdateOutcome::PartialSuccess => 4,
            UpdateOutcome::Failed | UpdateOutcome::RecoverableFailure if self.recovery_performed => 3,
            UpdateOutcome::Failed | UpdateOutcome::RecoverableFailure => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionCheckResult {
    pub current: Option<String>,
    pub latest: Option<String>,
    pub upgrade_available: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_maps_success_to_zero() {
        assert_eq!(UpdateResult::no_op_success(Some("v1.0.0".into())).exit_code(), 0);
    }

    #[test]
    fn exit_code_maps_already_in_progress_to_two() {
        assert_eq!(UpdateResult::already_in_progress().exit_code(), 2);
    }

    #[test]
    fn exit_code_distinguishes_rollback_from_plain_failure() {
        let mut fatal = UpdateResult::fatal(Some("v1.0.0".into()), "backup failed");
        assert_eq!(fatal.exit_code(), 2);
        fatal.recovery_performed = true;
        assert_eq!(fatal.exit_code(), 3);
    }
}
