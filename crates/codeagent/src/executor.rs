//! One-task execution: spawn the backend, feed stdin, normalize stdout,
//! bound stderr, and derive the final exit code under three independent
//! cancel sources (timeout, external abort, OS signal).

use std::sync::Arc;
use std::time::Duration;

use agent_events::{parse_stream, BackendFlavor, ProgressUpdate, StreamParser};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{self, build_invocation};
use crate::env::minimal_child_env;
use crate::error::{exit, ConfigError};
use crate::logger::Logger;
use crate::process::{
    self, drain_stderr, spawn_with_retry, STDERR_BUFFER_SIZE, TERMINATE_GRACE,
};
use crate::result::{MessageFilter, TaskResult};
use crate::signal::{SignalBridge, SIGINT};
use crate::task::TaskSpec;

/// Shared services handed to every execution. Explicitly constructed and
/// passed down; nothing here is a process-global.
pub struct RuntimeContext {
    pub logger: Logger,
    pub signals: SignalBridge,
}

impl RuntimeContext {
    pub fn new(logger: Logger, signals: SignalBridge) -> Self {
        Self { logger, signals }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Per-execution knobs.
#[derive(Clone)]
pub struct ExecOptions {
    /// `None` waits for the child indefinitely.
    pub timeout: Option<Duration>,
    /// External abort; cancelling is idempotent.
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
    /// Mirror backend stderr lines to the wrapper's stderr.
    pub mirror_stderr: bool,
    /// Whether the wrapper's own stdin is piped (forces stdin feed).
    pub stdin_piped: bool,
    pub stderr_cap: usize,
    /// Message post-processing; identity when unset.
    pub filter: Option<MessageFilter>,
    /// Grace between terminate and kill.
    pub grace: Duration,
    /// Log per-task wall-clock timings.
    pub perf_metrics: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: CancellationToken::new(),
            progress: None,
            mirror_stderr: false,
            stdin_piped: false,
            stderr_cap: STDERR_BUFFER_SIZE,
            filter: None,
            grace: TERMINATE_GRACE,
            perf_metrics: false,
        }
    }
}

/// Task length beyond which the prompt always travels over stdin.
const STDIN_LENGTH_THRESHOLD: usize = 800;

/// Bound on pipe draining after a forced termination; an orphaned grandchild
/// may keep the pipe open indefinitely.
const DRAIN_AFTER_KILL: Duration = Duration::from_secs(2);

/// Whether to feed the task text over stdin instead of argv. Shell-sensitive
/// characters force stdin so the text survives any re-quoting between the
/// wrapper and the backend.
pub fn should_use_stdin(spec: &TaskSpec, stdin_piped: bool, task: &str) -> bool {
    spec.use_stdin
        || stdin_piped
        || task.len() > STDIN_LENGTH_THRESHOLD
        || task
            .chars()
            .any(|c| matches!(c, '\n' | '\\' | '"' | '`' | '\'' | '$'))
}

enum CancelCause {
    Timeout,
    Abort,
    Signal(i32),
}

enum Step {
    Exited(std::io::Result<std::process::ExitStatus>),
    IoDone,
    Cancelled(CancelCause),
    KillNow,
}

/// Runs one task to completion and returns its unified result. Child-level
/// failures (spawn, timeout, interrupt, non-zero exit) are encoded in the
/// result rather than raised, so a scheduler never crashes on one task.
pub async fn run_task(
    spec: &TaskSpec,
    flavor: BackendFlavor,
    ctx: &RuntimeContext,
    opts: &ExecOptions,
) -> TaskResult {
    let started = Instant::now();

    if let Some(dir) = spec.work_dir.as_deref() {
        if !dir.is_dir() {
            let err = ConfigError::BadWorkdir {
                path: dir.to_path_buf(),
            };
            ctx.logger.error(format!("task {}: {err}", spec.id));
            return failure_result(spec, exit::CONFIG, err.to_string(), ctx);
        }
    }

    let task_text = effective_task_text(spec, ctx).await;
    let use_stdin = should_use_stdin(spec, opts.stdin_piped, &task_text);

    let invocation = {
        let mut spec = spec.clone();
        spec.task = task_text.clone();
        build_invocation(&spec, flavor, use_stdin)
    };
    debug!(
        task = %spec.id,
        command = invocation.command,
        argv = ?invocation.argv,
        use_stdin,
        "spawning backend"
    );
    ctx.logger.info(format!(
        "task {}: starting {} ({} args)",
        spec.id,
        invocation.command,
        invocation.argv.len()
    ));

    let mut command = tokio::process::Command::new(invocation.command);
    command
        .args(&invocation.argv)
        .stdin(if use_stdin {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = spec.work_dir.as_deref() {
        command.current_dir(dir);
    }
    if spec.minimal_env {
        command.env_clear().envs(minimal_child_env());
    }

    let mut child = match spawn_with_retry(&mut command) {
        Ok(child) => child,
        Err(source) => {
            let error = if source.kind() == std::io::ErrorKind::NotFound {
                format!(
                    "{}: command not found; install the {} CLI and ensure it is on PATH",
                    invocation.command, flavor
                )
            } else {
                format!("failed to spawn {}: {source}", invocation.command)
            };
            ctx.logger.error(format!("task {}: {error}", spec.id));
            return failure_result(spec, exit::NOT_FOUND, error, ctx);
        }
    };

    if use_stdin {
        if let Some(mut stdin) = child.stdin.take() {
            // A backend may exit before reading its prompt; a broken pipe
            // here is its answer, not our failure.
            if let Err(source) = stdin.write_all(task_text.as_bytes()).await {
                if source.kind() != std::io::ErrorKind::BrokenPipe {
                    ctx.logger
                        .warn(format!("task {}: stdin write failed: {source}", spec.id));
                }
            }
            let _ = stdin.shutdown().await;
        }
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_task = stderr.map(|stderr| {
        tokio::spawn(drain_stderr(stderr, opts.stderr_cap, opts.mirror_stderr))
    });

    let mut parser = StreamParser::new();
    if let Some(progress) = opts.progress.clone() {
        parser = parser.on_progress(move |update| progress(update));
    }

    let mut timed_out = false;
    let mut interrupted = false;
    let mut signals = ctx.signals.subscribe();
    let cancel = opts.cancel.clone();
    let timeout = opts.timeout;

    let status = {
        let io_fut = async {
            match stdout {
                Some(stdout) => {
                    // Bad lines are skipped inside the parser; an aborted
                    // stream only truncates what was extracted.
                    let _ = parse_stream(stdout, &mut parser).await;
                }
                None => {}
            }
        };
        tokio::pin!(io_fut);

        let cancel_fut = async {
            tokio::select! {
                _ = sleep_opt(timeout) => CancelCause::Timeout,
                _ = cancel.cancelled() => CancelCause::Abort,
                signo = signals.recv() => CancelCause::Signal(signo.unwrap_or(SIGINT)),
            }
        };
        tokio::pin!(cancel_fut);

        let mut io_done = false;
        let mut cancel_fired = false;
        let mut kill_at: Option<Instant> = None;

        let status = loop {
            let step = tokio::select! {
                status = child.wait() => Step::Exited(status),
                _ = &mut io_fut, if !io_done => Step::IoDone,
                cause = &mut cancel_fut, if !cancel_fired => Step::Cancelled(cause),
                _ = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)),
                    if kill_at.is_some() => Step::KillNow,
            };
            match step {
                Step::Exited(status) => break status,
                Step::IoDone => io_done = true,
                Step::Cancelled(cause) => {
                    cancel_fired = true;
                    match cause {
                        CancelCause::Timeout => {
                            timed_out = true;
                            ctx.logger.warn(format!("task {}: timed out", spec.id));
                            process::request_terminate(&child);
                        }
                        CancelCause::Abort => {
                            interrupted = true;
                            ctx.logger.warn(format!("task {}: aborted", spec.id));
                            process::request_terminate(&child);
                        }
                        CancelCause::Signal(signo) => {
                            interrupted = true;
                            ctx.logger
                                .warn(format!("task {}: signal {signo} forwarded", spec.id));
                            process::forward_signal(&child, signo);
                        }
                    }
                    kill_at = Some(Instant::now() + opts.grace);
                }
                Step::KillNow => {
                    let _ = child.start_kill();
                    kill_at = None;
                }
            }
        };

        // Let EOF cascade through the parser. A terminated child gets a
        // bounded drain in case an orphan still holds the pipe open.
        if !io_done {
            if cancel_fired {
                let _ = tokio::time::timeout(DRAIN_AFTER_KILL, &mut io_fut).await;
            } else {
                io_fut.await;
            }
        }
        (status, cancel_fired)
    };
    let (status, cancel_fired) = status;

    let parsed = parser.into_parsed();
    let stderr_tail = match stderr_task {
        Some(task) => {
            let tail = if cancel_fired {
                tokio::time::timeout(DRAIN_AFTER_KILL, task)
                    .await
                    .unwrap_or_else(|_| Ok(process::TailBuffer::new(0)))
            } else {
                task.await
            };
            tail.map(process::TailBuffer::into_string).unwrap_or_default()
        }
        None => String::new(),
    };

    let raw_code = status.ok().and_then(|s| s.code());
    let exit_code = if timed_out {
        exit::TIMEOUT
    } else if interrupted {
        exit::INTERRUPTED
    } else {
        raw_code.unwrap_or(exit::FAILURE)
    };

    let resolved_flavor = if parsed.flavor == BackendFlavor::Unknown {
        flavor
    } else {
        parsed.flavor
    };
    let message = match opts.filter.as_ref() {
        Some(filter) => filter(&parsed.message, resolved_flavor),
        None => parsed.message,
    };

    let error = if exit_code == exit::OK {
        String::new()
    } else {
        let tail = stderr_tail.trim();
        if !tail.is_empty() {
            tail.to_string()
        } else if timed_out {
            format!("timed out after {:?}", opts.timeout.unwrap_or_default())
        } else if interrupted {
            "interrupted".to_string()
        } else {
            format!("backend exited with code {exit_code}")
        }
    };

    let elapsed = started.elapsed();
    ctx.logger.info(format!(
        "task {}: finished with exit code {exit_code}",
        spec.id
    ));
    if opts.perf_metrics {
        ctx.logger
            .info(format!("task {}: wall clock {}ms", spec.id, elapsed.as_millis()));
    }
    debug!(task = %spec.id, exit_code, elapsed_ms = elapsed.as_millis() as u64, "task finished");

    let result = TaskResult {
        task_id: spec.id.clone(),
        exit_code,
        message,
        session_id: parsed.session_id,
        error,
        log_path: ctx.logger.path().map(Into::into),
        stderr_tail: if exit_code != exit::OK {
            stderr_tail
        } else {
            String::new()
        },
        ..TaskResult::default()
    };
    let summary = serde_json::json!({
        "task_id": result.task_id,
        "exit_code": result.exit_code,
        "session_id": result.session_id,
        "message_bytes": result.message.len(),
    });
    ctx.logger.debug(format!("result {summary}"));
    result
}

async fn sleep_opt(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

/// Merges the prompt-file preamble into the task text. Read failures are
/// logged and the bare task text is used; they never fail the task.
async fn effective_task_text(spec: &TaskSpec, ctx: &RuntimeContext) -> String {
    let Some(path) = spec.prompt_file.as_deref() else {
        return spec.task.clone();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(prompt) => format!("{prompt}\n\n=== TASK ===\n{}", spec.task),
        Err(source) => {
            ctx.logger.warn(format!(
                "task {}: could not read prompt file {}: {source}",
                spec.id,
                path.display()
            ));
            spec.task.clone()
        }
    }
}

fn failure_result(spec: &TaskSpec, exit_code: i32, error: String, ctx: &RuntimeContext) -> TaskResult {
    TaskResult {
        task_id: spec.id.clone(),
        exit_code,
        error,
        log_path: ctx.logger.path().map(Into::into),
        ..TaskResult::default()
    }
}

/// Pre-flight probe used by single-task mode: fail with 127 before spawning
/// when the backend binary is plainly absent. Parallel runs skip this.
pub fn probe_backend(flavor: BackendFlavor) -> Result<(), TaskResult> {
    let command = match flavor {
        BackendFlavor::Codex => "codex",
        BackendFlavor::Claude => "claude",
        BackendFlavor::Gemini => "gemini",
        BackendFlavor::Opencode => "opencode",
        BackendFlavor::Unknown => return Ok(()),
    };
    if backend::command_on_path(command) {
        Ok(())
    } else {
        Err(TaskResult {
            exit_code: exit::NOT_FOUND,
            error: format!(
                "{command}: command not found; install the {flavor} CLI and ensure it is on PATH"
            ),
            ..TaskResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_policy_triggers() {
        let mut spec = TaskSpec::new("t", "plain words");
        assert!(!should_use_stdin(&spec, false, &spec.task));
        assert!(should_use_stdin(&spec, true, &spec.task));

        spec.use_stdin = true;
        assert!(should_use_stdin(&spec, false, &spec.task));
        spec.use_stdin = false;

        for needle in ["a\nb", "back\\slash", "quo\"te", "tick`", "apo'", "dol$ar"] {
            assert!(should_use_stdin(&spec, false, needle), "{needle:?}");
        }

        let long = "x".repeat(801);
        assert!(should_use_stdin(&spec, false, &long));
        let borderline = "x".repeat(800);
        assert!(!should_use_stdin(&spec, false, &borderline));
    }
}
