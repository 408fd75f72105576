//! Per-backend invocation construction.
//!
//! Pure functions from a task spec to `(command, argv)`. Flag ordering is
//! part of each backend's compatibility contract and is pinned by tests.

use std::path::Path;

use agent_events::BackendFlavor;

use crate::error::ConfigError;
use crate::task::TaskSpec;

/// The argv placeholder that tells a backend to read its prompt from stdin.
pub const STDIN_TARGET: &str = "-";

/// A fully resolved child invocation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Invocation {
    pub command: &'static str,
    pub argv: Vec<String>,
}

/// Resolves a backend tag (case-insensitive) or fails with a configuration
/// error.
pub fn resolve_backend(name: &str) -> Result<BackendFlavor, ConfigError> {
    match BackendFlavor::parse(name) {
        BackendFlavor::Unknown => Err(ConfigError::UnknownBackend(name.to_owned())),
        flavor => Ok(flavor),
    }
}

/// Builds the invocation for one task under the given flavor.
///
/// `use_stdin` selects the stdin placeholder as the target argument instead
/// of the task text; the caller is then responsible for feeding stdin.
pub fn build_invocation(spec: &TaskSpec, flavor: BackendFlavor, use_stdin: bool) -> Invocation {
    let target = if use_stdin {
        STDIN_TARGET.to_string()
    } else {
        spec.task.clone()
    };

    match flavor {
        BackendFlavor::Codex => codex_invocation(spec, target),
        BackendFlavor::Claude => claude_invocation(spec, target),
        BackendFlavor::Gemini => gemini_invocation(spec, target),
        BackendFlavor::Opencode => opencode_invocation(spec, target),
        BackendFlavor::Unknown => {
            unreachable!("unknown flavors are rejected by resolve_backend before invocation")
        }
    }
}

fn workdir_or_cwd(spec: &TaskSpec) -> String {
    spec.work_dir
        .as_deref()
        .map(Path::to_string_lossy)
        .map(|s| s.into_owned())
        .unwrap_or_else(|| ".".to_string())
}

fn codex_invocation(spec: &TaskSpec, target: String) -> Invocation {
    let mut argv = vec![
        "e".to_string(),
        "-C".to_string(),
        workdir_or_cwd(spec),
        "--json".to_string(),
    ];
    if let Some(session) = spec.session_id.as_deref() {
        argv.push("-r".to_string());
        argv.push(session.to_string());
    }
    if let Some(model) = spec.model.as_deref() {
        argv.push("-m".to_string());
        argv.push(model.to_string());
    }
    if let Some(effort) = spec.reasoning_effort.as_deref() {
        argv.push("--reasoning-effort".to_string());
        argv.push(effort.to_string());
    }
    if spec.skip_permissions {
        argv.push("--full-auto".to_string());
    }
    argv.push(target);
    Invocation {
        command: "codex",
        argv,
    }
}

fn claude_invocation(spec: &TaskSpec, target: String) -> Invocation {
    let mut argv = vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
    ];
    if spec.skip_permissions {
        argv.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(model) = spec.model.as_deref() {
        argv.push("--model".to_string());
        argv.push(model.to_string());
    }
    if let Some(session) = spec.session_id.as_deref() {
        argv.push("-r".to_string());
        argv.push(session.to_string());
    }
    argv.push("--disable-settings-source".to_string());
    argv.push(target);
    Invocation {
        command: "claude",
        argv,
    }
}

fn gemini_invocation(spec: &TaskSpec, target: String) -> Invocation {
    let mut argv = vec![
        "-o".to_string(),
        "stream-json".to_string(),
        "-y".to_string(),
    ];
    if let Some(model) = spec.model.as_deref() {
        argv.push("-m".to_string());
        argv.push(model.to_string());
    }
    if let Some(session) = spec.session_id.as_deref() {
        argv.push("-r".to_string());
        argv.push(session.to_string());
    }
    argv.push(target);
    Invocation {
        command: "gemini",
        argv,
    }
}

fn opencode_invocation(spec: &TaskSpec, target: String) -> Invocation {
    let mut argv = vec![
        "run".to_string(),
        "--format".to_string(),
        "json".to_string(),
    ];
    if let Some(model) = spec.model.as_deref() {
        argv.push("-m".to_string());
        argv.push(model.to_string());
    }
    if let Some(session) = spec.session_id.as_deref() {
        argv.push("-s".to_string());
        argv.push(session.to_string());
    }
    argv.push(target);
    Invocation {
        command: "opencode",
        argv,
    }
}

/// Whether `command` resolves to an executable on `PATH`.
///
/// Used to fail fast (exit 127) in single-task mode; parallel runs skip this
/// probe because different tasks may target different backends.
pub fn command_on_path(command: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(command);
        #[cfg(windows)]
        let candidate_exe = dir.join(format!("{command}.exe"));
        #[cfg(windows)]
        if candidate_exe.is_file() {
            return true;
        }
        candidate.is_file()
    })
}
