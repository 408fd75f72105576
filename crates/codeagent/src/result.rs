//! The unified result record returned for every task.

use std::path::PathBuf;
use std::sync::Arc;

use agent_events::BackendFlavor;
use serde::Serialize;

use crate::error::exit;

/// Post-processing hook applied to the extracted message before it reaches
/// the caller. Sanitization and noise filtering live outside the core; the
/// default is the identity.
pub type MessageFilter = Arc<dyn Fn(&str, BackendFlavor) -> String + Send + Sync>;

/// What one task execution produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub exit_code: i32,
    pub message: String,
    pub session_id: String,
    /// Non-empty only when `exit_code != 0`.
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr_tail: String,

    // Metric hooks, populated by an external extractor over the sanitized
    // message; reserved here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_failed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_output: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            exit_code: exit::OK,
            ..Self::default()
        }
    }

    /// The synthesized result for a task whose dependency failed or was
    /// itself skipped. No child is spawned for these.
    pub fn skipped(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            exit_code: exit::FAILURE,
            message: "Skipped due to dependency failure".to_string(),
            error: "Dependency failed".to_string(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == exit::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_result_shape() {
        let r = TaskResult::skipped("b");
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.message, "Skipped due to dependency failure");
        assert_eq!(r.error, "Dependency failed");
        assert!(r.session_id.is_empty());
    }
}
