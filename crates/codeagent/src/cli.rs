//! The thin CLI adapter: argument surface, env merge, validation, and
//! dispatch into the executor or the scheduler. All typed errors become
//! process exit codes here and nowhere else.

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use agent_events::{BackendFlavor, ProgressStage, ProgressUpdate};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::backend::resolve_backend;
use crate::config::Config;
use crate::error::{exit, validate_agent_name, validate_session_id, ConfigError};
use crate::executor::{probe_backend, run_task, ExecOptions, RuntimeContext};
use crate::logger::{cleanup_stale_logs, default_log_dir, Logger, LoggerOptions};
use crate::result::TaskResult;
use crate::scheduler::{overall_exit, run_parallel, summarize, ParallelOptions};
use crate::signal::{exit_code_for_signal, SignalBridge};
use crate::task::{parse_task_blocks, TaskSpec};

/// Backend used when neither `--backend` nor `CODEAGENT_BACKEND` names one.
const DEFAULT_BACKEND: BackendFlavor = BackendFlavor::Codex;

#[derive(Debug, Parser)]
#[command(name = "codeagent")]
#[command(about = "Uniform front for AI agent CLIs (codex, claude, gemini, opencode)")]
#[command(version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Task text, or `-` to read the task from stdin.
    pub task: Option<String>,

    /// Working directory for the backend process.
    pub workdir: Option<PathBuf>,

    /// Backend to invoke: codex | claude | gemini | opencode.
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Model name passed through to the backend.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Agent preset name (resolved by the preset loader).
    #[arg(long, global = true)]
    pub agent: Option<String>,

    /// File whose contents are prepended to the task.
    #[arg(long, global = true)]
    pub prompt_file: Option<PathBuf>,

    /// Reasoning effort hint (backend-specific).
    #[arg(long, global = true)]
    pub reasoning_effort: Option<String>,

    /// Skip backend permission prompts.
    #[arg(long, visible_alias = "yolo", global = true)]
    pub skip_permissions: bool,

    /// Per-task timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<i64>,

    /// Read `---TASK---` blocks from stdin and run them as a DAG.
    #[arg(long)]
    pub parallel: bool,

    /// Print every task's full message instead of a summary.
    #[arg(long)]
    pub full_output: bool,

    /// Suppress progress output.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Mirror backend stderr lines, prefixed `[BACKEND] `.
    #[arg(long, global = true)]
    pub backend_output: bool,

    /// Enable diagnostic tracing to stderr.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Spawn backends with a reduced environment.
    #[arg(long, global = true)]
    pub minimal_env: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resume an existing backend session with a follow-up task.
    Resume {
        session_id: String,
        task: String,
        workdir: Option<PathBuf>,
    },
}

/// Everything `main` needs to run, derived from CLI + environment.
pub struct Effective {
    pub config: Config,
    pub parallel: bool,
    pub full_output: bool,
    pub spec: TaskSpec,
    pub flavor: BackendFlavor,
}

/// Merges CLI flags over the environment snapshot and validates the result.
/// Nothing is spawned until this returns `Ok`.
pub fn resolve(cli: &Cli) -> Result<Effective, ConfigError> {
    let mut config = Config::from_env();
    if let Some(seconds) = cli.timeout {
        if seconds <= 0 {
            return Err(ConfigError::NonPositiveTimeout(seconds));
        }
        config.timeout = Some(std::time::Duration::from_secs(seconds as u64));
    }
    config.skip_permissions |= cli.skip_permissions;
    config.quiet |= cli.quiet;
    config.backend_output |= cli.backend_output;
    config.debug |= cli.debug;
    if let Some(backend) = cli.backend.as_deref() {
        config.backend = Some(backend.to_string());
    }
    if let Some(model) = cli.model.as_deref() {
        config.model = Some(model.to_string());
    }

    let flavor = match config.backend.as_deref() {
        Some(name) => resolve_backend(name)?,
        None => DEFAULT_BACKEND,
    };

    let mut spec = TaskSpec::default();
    spec.backend_name = flavor.as_str().to_string();
    spec.model = config.model.clone();
    spec.skip_permissions = config.skip_permissions;
    spec.minimal_env = cli.minimal_env;
    spec.reasoning_effort = cli.reasoning_effort.clone();

    if let Some(agent) = cli.agent.as_deref() {
        validate_agent_name(agent)?;
        spec.agent = Some(agent.to_string());
    }
    if let Some(path) = cli.prompt_file.as_deref() {
        // Fail fast here; per-block prompt files in parallel mode degrade
        // softly inside the executor instead.
        if let Err(source) = std::fs::read_to_string(path) {
            return Err(ConfigError::PromptFileUnreadable {
                path: path.to_path_buf(),
                source,
            });
        }
        spec.prompt_file = Some(path.to_path_buf());
    }

    let (task, workdir) = match &cli.command {
        Some(Command::Resume {
            session_id,
            task,
            workdir,
        }) => {
            validate_session_id(session_id)?;
            spec.session_id = Some(session_id.clone());
            (Some(task.clone()), workdir.clone())
        }
        None => (cli.task.clone(), cli.workdir.clone()),
    };

    if let Some(dir) = workdir {
        if dir.as_os_str() == "-" {
            return Err(ConfigError::DashWorkdir);
        }
        if !dir.is_dir() {
            return Err(ConfigError::BadWorkdir { path: dir });
        }
        spec.work_dir = Some(dir);
    }

    if cli.parallel {
        spec.id = "parallel".to_string();
    } else {
        let task = task.ok_or(ConfigError::MissingTask)?;
        if task == "-" {
            spec.use_stdin = true;
        } else if task.trim().is_empty() {
            return Err(ConfigError::MissingTask);
        } else {
            spec.task = task;
        }
        spec.id = "task".to_string();
    }

    Ok(Effective {
        parallel: cli.parallel,
        full_output: cli.full_output,
        config,
        spec,
        flavor,
    })
}

fn open_logger(config: &Config) -> Logger {
    let Some(dir) = default_log_dir() else {
        return Logger::null();
    };
    if let Ok(removed) = cleanup_stale_logs(&dir) {
        if removed > 0 {
            tracing::debug!(removed, "cleaned stale log files");
        }
    }
    let options = LoggerOptions {
        queue_capacity: config.logger_queue_size,
        flush_interval: config.logger_flush_interval,
        close_timeout: config.logger_close_timeout,
    };
    match Logger::open(&dir, "codeagent", None, options) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("codeagent: logging disabled: {err}");
            Logger::null()
        }
    }
}

fn progress_glyph(ascii: bool, stage: ProgressStage) -> &'static str {
    if ascii {
        match stage {
            ProgressStage::Started => ">",
            ProgressStage::Analyzing => "~",
            ProgressStage::Executing => "*",
            ProgressStage::Completed => "=",
        }
    } else {
        match stage {
            ProgressStage::Started => "▷",
            ProgressStage::Analyzing => "◌",
            ProgressStage::Executing => "●",
            ProgressStage::Completed => "✓",
        }
    }
}

/// Stderr progress printer: one line per stage transition.
fn progress_printer(
    ascii: bool,
    label: Option<String>,
) -> impl Fn(&ProgressUpdate) + Send + Sync {
    let last = Mutex::new(None::<ProgressStage>);
    move |update: &ProgressUpdate| {
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(update.stage) {
            return;
        }
        *last = Some(update.stage);
        let glyph = progress_glyph(ascii, update.stage);
        match (&label, update.tool.as_deref()) {
            (Some(label), Some(tool)) => {
                eprintln!("{glyph} [{label}] {} ({tool})", update.stage.as_str())
            }
            (Some(label), None) => eprintln!("{glyph} [{label}] {}", update.stage.as_str()),
            (None, Some(tool)) => eprintln!("{glyph} {} ({tool})", update.stage.as_str()),
            (None, None) => eprintln!("{glyph} {}", update.stage.as_str()),
        }
    }
}

fn exec_options(effective: &Effective, cancel: CancellationToken) -> ExecOptions {
    ExecOptions {
        timeout: effective.config.timeout,
        cancel,
        progress: None,
        mirror_stderr: effective.config.backend_output,
        stdin_piped: false,
        stderr_cap: effective.config.stderr_buffer_size,
        filter: None,
        grace: crate::process::TERMINATE_GRACE,
        perf_metrics: effective.config.performance_metrics,
    }
}

/// Runs the resolved invocation to completion and returns the process exit
/// code.
pub async fn execute(effective: Effective) -> i32 {
    let ctx = Arc::new(RuntimeContext::new(
        open_logger(&effective.config),
        SignalBridge::new(),
    ));

    let code = if effective.parallel {
        run_parallel_mode(&effective, &ctx).await
    } else {
        run_single_mode(&effective, &ctx).await
    };

    ctx.logger.close().await;

    match ctx.signals.last_signal() {
        Some(signo) => exit_code_for_signal(signo),
        None => code,
    }
}

async fn run_single_mode(effective: &Effective, ctx: &Arc<RuntimeContext>) -> i32 {
    if let Err(result) = probe_backend(effective.flavor) {
        report_failure(&result);
        return result.exit_code;
    }

    let mut spec = effective.spec.clone();
    let mut options = exec_options(effective, CancellationToken::new());
    options.stdin_piped = !std::io::stdin().is_terminal();
    if spec.use_stdin && spec.task.is_empty() {
        let mut task = String::new();
        if std::io::stdin().read_to_string(&mut task).is_err() || task.trim().is_empty() {
            let err = ConfigError::MissingTask;
            eprintln!("codeagent: {err}");
            return exit::CONFIG;
        }
        spec.task = task;
    }
    if !effective.config.quiet {
        options.progress = Some(Arc::new(progress_printer(
            effective.config.ascii_mode,
            None,
        )));
    }

    let result = run_task(&spec, effective.flavor, ctx, &options).await;

    if !result.message.is_empty() {
        println!("{}", result.message);
    }
    if !result.is_success() {
        report_failure(&result);
    }
    result.exit_code
}

async fn run_parallel_mode(effective: &Effective, ctx: &Arc<RuntimeContext>) -> i32 {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("codeagent: failed to read task blocks from stdin");
        return exit::CONFIG;
    }
    let mut tasks = parse_task_blocks(&input);
    if tasks.is_empty() {
        eprintln!("codeagent: {}", ConfigError::EmptyTaskSet);
        return exit::CONFIG;
    }
    for spec in &mut tasks {
        if spec.model.is_none() {
            spec.model = effective.config.model.clone();
        }
        spec.skip_permissions |= effective.config.skip_permissions;
        spec.minimal_env |= effective.spec.minimal_env;
    }

    let options = ParallelOptions {
        max_workers: effective.config.max_workers,
        default_backend: effective.flavor,
        exec: exec_options(effective, CancellationToken::new()),
        progress: if effective.config.quiet {
            None
        } else {
            let ascii = effective.config.ascii_mode;
            let printers: Mutex<std::collections::HashMap<String, Box<dyn Fn(&ProgressUpdate) + Send + Sync>>> =
                Mutex::new(std::collections::HashMap::new());
            Some(Arc::new(move |task_id: &str, update: &ProgressUpdate| {
                let mut printers = printers.lock().unwrap_or_else(|e| e.into_inner());
                let printer = printers.entry(task_id.to_string()).or_insert_with(|| {
                    Box::new(progress_printer(ascii, Some(task_id.to_string())))
                });
                printer(update);
            }))
        },
    };

    let results = match run_parallel(&tasks, ctx, &options).await {
        Ok(results) => results,
        Err(err) => {
            eprintln!("codeagent: {err}");
            return exit::CONFIG;
        }
    };

    for result in &results {
        if effective.full_output {
            println!("=== {} (exit {}) ===", result.task_id, result.exit_code);
            if !result.message.is_empty() {
                println!("{}", result.message);
            }
        } else if result.is_success() && !result.message.is_empty() {
            println!("{}", result.message);
        }
        if !result.is_success() {
            report_failure(result);
        }
    }
    let (succeeded, failed) = summarize(&results);
    eprintln!("codeagent: {succeeded} succeeded, {failed} failed");

    overall_exit(&results)
}

/// Prints the short structured failure surface: what went wrong, a
/// suggestion where one exists, and the captured stderr tail.
fn report_failure(result: &TaskResult) {
    let label = if result.task_id.is_empty() {
        String::new()
    } else {
        format!(" [{}]", result.task_id)
    };
    eprintln!(
        "codeagent{label}: failed with exit code {}: {}",
        result.exit_code, result.error
    );
    match result.exit_code {
        exit::TIMEOUT => {
            eprintln!("codeagent{label}: consider raising --timeout or CODEX_TIMEOUT")
        }
        exit::NOT_FOUND => {
            eprintln!("codeagent{label}: is the backend CLI installed and on PATH?")
        }
        _ => {}
    }
    if !result.stderr_tail.trim().is_empty() && result.stderr_tail.trim() != result.error {
        eprintln!("{}", result.stderr_tail.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("codeagent").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn resolve_requires_a_task() {
        let cli = parse(&[]);
        assert!(matches!(resolve(&cli), Err(ConfigError::MissingTask)));
    }

    #[test]
    fn resolve_rejects_bad_flags() {
        let cli = parse(&["--timeout", "0", "hi"]);
        assert!(matches!(
            resolve(&cli),
            Err(ConfigError::NonPositiveTimeout(0))
        ));

        let cli = parse(&["--backend", "cursor", "hi"]);
        assert!(matches!(resolve(&cli), Err(ConfigError::UnknownBackend(_))));

        let cli = parse(&["hi", "-"]);
        assert!(matches!(resolve(&cli), Err(ConfigError::DashWorkdir)));
    }

    #[test]
    fn resolve_builds_a_single_task_spec() {
        let cli = parse(&["--backend", "claude", "--model", "sonnet", "--yolo", "do it"]);
        let effective = resolve(&cli).unwrap();
        assert!(!effective.parallel);
        assert_eq!(effective.flavor, BackendFlavor::Claude);
        assert_eq!(effective.spec.task, "do it");
        assert_eq!(effective.spec.model.as_deref(), Some("sonnet"));
        assert!(effective.spec.skip_permissions);
    }

    #[test]
    fn resume_subcommand_validates_session_id() {
        let cli = parse(&["resume", "abc-123", "continue"]);
        let effective = resolve(&cli).unwrap();
        assert_eq!(effective.spec.session_id.as_deref(), Some("abc-123"));
        assert_eq!(effective.spec.task, "continue");

        let cli = Cli::try_parse_from(["codeagent", "resume", "-bad", "x"]);
        // A leading dash is eaten by clap as a flag; either way it cannot
        // reach the backend as a session id.
        if let Ok(cli) = cli {
            assert!(matches!(resolve(&cli), Err(ConfigError::BadSessionId(_))));
        }
    }

    #[test]
    fn dash_task_requests_stdin() {
        let cli = parse(&["-"]);
        let effective = resolve(&cli).unwrap();
        assert!(effective.spec.use_stdin);
        assert!(effective.spec.task.is_empty());
    }
}
