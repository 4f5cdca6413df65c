//! Evidence Status and Execution Results
//!
//! The evidence record is owned by the backend; this subsystem only
//! transitions its status and attaches artifact files. Status transitions
//! follow `Draft -> Running -> {Passed | Failed}`, with Failed reachable
//! from any state on the uncaught-exception path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote evidence record status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EvidenceStatus {
    /// Created, not yet executed (also the terminal state of a no-op run)
    #[default]
    Draft,
    /// Execution in progress
    Running,
    /// Subprocess exited zero
    Passed,
    /// Subprocess exited nonzero, timed out, or the run raised
    Failed,
}

impl EvidenceStatus {
    /// Whether this status ends the run's state machine
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvidenceStatus::Passed | EvidenceStatus::Failed)
    }

    /// Whether `next` is a legal transition from this status
    pub fn can_transition_to(&self, next: EvidenceStatus) -> bool {
        match (self, next) {
            (EvidenceStatus::Draft, EvidenceStatus::Running) => true,
            (EvidenceStatus::Running, EvidenceStatus::Passed) => true,
            // Failed is reachable from anywhere: the exception path forces
            // it regardless of whether a process even started
            (_, EvidenceStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceStatus::Draft => "Draft",
            EvidenceStatus::Running => "Running",
            EvidenceStatus::Passed => "Passed",
            EvidenceStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for EvidenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result returned by both public execution entry points.
///
/// Callers always receive a result object, never an error: the `logs` field
/// is the single channel for whatever went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionResult {
    /// Whether the run is considered successful (Passed, or Draft no-op)
    pub success: bool,
    pub status: EvidenceStatus,
    /// Captured stdout/stderr, or the failure message
    pub logs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub images_urls: Vec<String>,
    #[serde(default)]
    pub database_files_urls: Vec<String>,
    #[serde(default)]
    pub api_files_urls: Vec<String>,
    /// Wall-clock duration in milliseconds
    pub execution_time: u64,
    /// When the run finished
    pub executed_at: DateTime<Utc>,
}

impl TestExecutionResult {
    /// Result for a run that never reached the browser because there were
    /// no actions to compile. A valid outcome, not a failure.
    pub fn draft_no_op(execution_time: u64) -> Self {
        Self::bare(true, EvidenceStatus::Draft, "No actions to execute", execution_time)
    }

    /// Failure result carrying the error message as the execution log
    pub fn failure(logs: impl Into<String>, execution_time: u64) -> Self {
        Self::bare(false, EvidenceStatus::Failed, logs, execution_time)
    }

    fn bare(
        success: bool,
        status: EvidenceStatus,
        logs: impl Into<String>,
        execution_time: u64,
    ) -> Self {
        Self {
            success,
            status,
            logs: logs.into(),
            video_url: None,
            images_urls: Vec::new(),
            database_files_urls: Vec::new(),
            api_files_urls: Vec::new(),
            execution_time,
            executed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(EvidenceStatus::Draft.can_transition_to(EvidenceStatus::Running));
        assert!(EvidenceStatus::Running.can_transition_to(EvidenceStatus::Passed));
        assert!(EvidenceStatus::Running.can_transition_to(EvidenceStatus::Failed));
        assert!(EvidenceStatus::Draft.can_transition_to(EvidenceStatus::Failed));

        assert!(!EvidenceStatus::Draft.can_transition_to(EvidenceStatus::Passed));
        assert!(!EvidenceStatus::Passed.can_transition_to(EvidenceStatus::Running));
    }

    #[test]
    fn test_terminal_states() {
        assert!(EvidenceStatus::Passed.is_terminal());
        assert!(EvidenceStatus::Failed.is_terminal());
        assert!(!EvidenceStatus::Draft.is_terminal());
        assert!(!EvidenceStatus::Running.is_terminal());
    }

    #[test]
    fn test_no_op_result() {
        let result = TestExecutionResult::draft_no_op(12);
        assert!(result.success);
        assert_eq!(result.status, EvidenceStatus::Draft);
        assert!(result.logs.contains("No actions"));
    }

    #[test]
    fn test_status_serializes_as_name() {
        let json = serde_json::to_string(&EvidenceStatus::Passed).unwrap();
        assert_eq!(json, "\"Passed\"");
    }
}
