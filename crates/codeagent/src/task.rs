//! Task specifications and the `---TASK---` block grammar consumed by
//! parallel runs.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{validate_agent_name, validate_session_id, ConfigError};

/// The immutable input to one execution.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Stable identifier, unique within a DAG.
    pub id: String,
    /// User prompt text. May be empty only when the caller feeds stdin.
    pub task: String,
    /// Child working directory; parent cwd when unset.
    pub work_dir: Option<PathBuf>,
    /// Ids of tasks that must complete first.
    pub dependencies: Vec<String>,
    /// Backend tag; empty means the caller's default applies.
    pub backend_name: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub prompt_file: Option<PathBuf>,
    pub reasoning_effort: Option<String>,
    /// Agent preset name; resolved by an external preset loader, carried
    /// through untouched here.
    pub agent: Option<String>,
    pub skip_permissions: bool,
    pub minimal_env: bool,
    /// Explicit request to feed the task over stdin.
    pub use_stdin: bool,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            ..Self::default()
        }
    }
}

/// Splits stdin input into task specs.
///
/// Blocks open at a line starting with `---TASK---`; within a block the
/// header ends at the literal `---CONTENT---` line and the body runs to the
/// next block or EOF. Unknown header keys are ignored. Blocks with an empty
/// id or empty content are discarded.
pub fn parse_task_blocks(input: &str) -> Vec<TaskSpec> {
    struct Block {
        spec: TaskSpec,
        body: Vec<String>,
        in_content: bool,
    }

    fn finish(block: Option<Block>, tasks: &mut Vec<TaskSpec>) {
        let Some(block) = block else { return };
        if !block.in_content {
            return;
        }
        let body = block.body.join("\n");
        let body = body.trim_end_matches('\n');
        if block.spec.id.is_empty() || body.trim().is_empty() {
            return;
        }
        let mut spec = block.spec;
        spec.task = body.to_string();
        tasks.push(spec);
    }

    let mut tasks = Vec::new();
    let mut block: Option<Block> = None;

    for line in input.lines() {
        if line.starts_with("---TASK---") {
            finish(block.take(), &mut tasks);
            block = Some(Block {
                spec: TaskSpec::default(),
                body: Vec::new(),
                in_content: false,
            });
            continue;
        }
        let Some(state) = block.as_mut() else {
            continue;
        };
        if state.in_content {
            state.body.push(line.to_string());
        } else if line.trim_end() == "---CONTENT---" {
            state.in_content = true;
        } else {
            apply_header_line(&mut state.spec, line);
        }
    }
    finish(block.take(), &mut tasks);

    tasks
}

fn apply_header_line(spec: &mut TaskSpec, line: &str) {
    let Some((key, value)) = line.split_once(':') else {
        return;
    };
    let value = value.trim();
    match key.trim() {
        "id" => spec.id = value.to_string(),
        "workdir" => {
            if !value.is_empty() {
                spec.work_dir = Some(PathBuf::from(value));
            }
        }
        "session_id" => {
            if !value.is_empty() {
                spec.session_id = Some(value.to_string());
            }
        }
        "backend" => spec.backend_name = value.to_string(),
        "model" => {
            if !value.is_empty() {
                spec.model = Some(value.to_string());
            }
        }
        "agent" => {
            if !value.is_empty() {
                spec.agent = Some(value.to_string());
            }
        }
        "dependencies" => {
            spec.dependencies = value
                .split(',')
                .map(str::trim)
                .filter(|dep| !dep.is_empty())
                .map(str::to_string)
                .collect();
        }
        "skip_permissions" => spec.skip_permissions = value == "true",
        _ => {}
    }
}

/// Validates a task set before any child is spawned: unique non-empty ids,
/// known dependency references, well-formed session ids and agent names,
/// known backend tags.
pub fn validate_task_set(tasks: &[TaskSpec]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for spec in tasks {
        if spec.id.is_empty() {
            return Err(ConfigError::MissingTaskId);
        }
        if !ids.insert(spec.id.as_str()) {
            return Err(ConfigError::DuplicateTaskId(spec.id.clone()));
        }
        if let Some(session) = spec.session_id.as_deref() {
            validate_session_id(session)?;
        }
        if let Some(agent) = spec.agent.as_deref() {
            validate_agent_name(agent)?;
        }
        if !spec.backend_name.is_empty() {
            crate::backend::resolve_backend(&spec.backend_name)?;
        }
    }
    for spec in tasks {
        for dep in &spec.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}
