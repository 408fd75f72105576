use std::path::PathBuf;

use thiserror::Error;

/// Conventional process exit codes surfaced by the wrapper.
pub mod exit {
    /// Success.
    pub const OK: i32 = 0;
    /// Generic failure (including skipped tasks and unknown child exits).
    pub const FAILURE: i32 = 1;
    /// Configuration error, detected before any child is spawned.
    pub const CONFIG: i32 = 2;
    /// Per-task timeout fired.
    pub const TIMEOUT: i32 = 124;
    /// Backend command could not be spawned (not found / exec failure).
    pub const NOT_FOUND: i32 = 127;
    /// Interrupted by an OS signal or an external abort.
    pub const INTERRUPTED: i32 = 130;
}

/// Errors detected before spawning any child. All map to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no task given; pass a task argument or `-` to read from stdin")]
    MissingTask,
    #[error("invalid session id `{0}`: must be non-empty, without whitespace, not start with `-`, and use only [A-Za-z0-9._:-]")]
    BadSessionId(String),
    #[error("`-` is not a valid working directory")]
    DashWorkdir,
    #[error("working directory `{path}` does not exist or is not a directory")]
    BadWorkdir { path: PathBuf },
    #[error("invalid agent name `{0}`: use only [A-Za-z0-9_-]")]
    BadAgentName(String),
    #[error("timeout must be a positive number of seconds (got {0})")]
    NonPositiveTimeout(i64),
    #[error("unknown backend `{0}`; expected codex, claude, gemini, or opencode")]
    UnknownBackend(String),
    #[error("failed to read prompt file `{path}`: {source}")]
    PromptFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("task block is missing an id")]
    MissingTaskId,
    #[error("duplicate task id `{0}`")]
    DuplicateTaskId(String),
    #[error("task `{task}` depends on unknown task `{dependency}`")]
    UnknownDependency { task: String, dependency: String },
    #[error("dependency cycle involving tasks: {0}")]
    CycleDetected(String),
    #[error("no tasks found on stdin; expected `---TASK---` blocks")]
    EmptyTaskSet,
}

/// Validates a session id for safe pass-through as a CLI argument.
pub fn validate_session_id(id: &str) -> Result<(), ConfigError> {
    let ok = !id.is_empty()
        && !id.starts_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::BadSessionId(id.to_owned()))
    }
}

/// Validates an agent preset name.
pub fn validate_agent_name(name: &str) -> Result<(), ConfigError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::BadAgentName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shapes() {
        assert!(validate_session_id("abc-123_X:7.9").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("-r").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id("semi;colon").is_err());
    }

    #[test]
    fn agent_name_shapes() {
        assert!(validate_agent_name("review-bot_2").is_ok());
        assert!(validate_agent_name("").is_err());
        assert!(validate_agent_name("a/b").is_err());
    }
}
