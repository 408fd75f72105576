//! Process-orchestration front for third-party AI agent CLIs.
//!
//! Accepts tasks, spawns the matching backend (Codex, Claude, Gemini, or
//! Opencode) as a child process, normalizes its JSONL output through
//! [`agent_events`], and optionally runs many tasks concurrently under a
//! dependency DAG with fail-fast skip semantics.
//!
//! Surfaces:
//! - [`executor::run_task`] for one task: spawn, stdin feed, stdout
//!   normalization, bounded stderr capture, timeout / abort / signal
//!   handling, and deterministic exit-code derivation.
//! - [`scheduler::run_parallel`] for a task set: topological layering,
//!   per-layer bounded concurrency, skip propagation.
//! - [`logger::Logger`] as the process-wide, never-blocking log sink.
//! - [`signal::SignalBridge`] to fan terminal signals out to executions.
//!
//! Shared services travel in an explicit [`executor::RuntimeContext`]; there
//! are no module-level singletons.

pub mod backend;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod logger;
pub mod process;
pub mod result;
pub mod scheduler;
pub mod signal;
pub mod task;

pub use agent_events::{BackendFlavor, ParsedStream, ProgressStage, ProgressUpdate};

pub use crate::backend::{build_invocation, resolve_backend, Invocation};
pub use crate::config::Config;
pub use crate::error::{exit, ConfigError};
pub use crate::executor::{run_task, ExecOptions, RuntimeContext};
pub use crate::logger::{Logger, LoggerOptions};
pub use crate::result::{MessageFilter, TaskResult};
pub use crate::scheduler::{plan_layers, run_parallel, DagPlan, ParallelOptions};
pub use crate::signal::SignalBridge;
pub use crate::task::{parse_task_blocks, TaskSpec};
