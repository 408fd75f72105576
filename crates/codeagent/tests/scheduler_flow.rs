//! DAG runs over stub backends: skip propagation, ordering, abort.

#![cfg(unix)]

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use agent_events::BackendFlavor;
use codeagent::error::ConfigError;
use codeagent::executor::{ExecOptions, RuntimeContext};
use codeagent::logger::Logger;
use codeagent::scheduler::{overall_exit, run_parallel, ParallelOptions};
use codeagent::signal::SignalBridge;
use codeagent::task::TaskSpec;
use tokio_util::sync::CancellationToken;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct FakeBackend {
    _dir: tempfile::TempDir,
    _guard: MutexGuard<'static, ()>,
    saved_path: OsString,
}

impl FakeBackend {
    fn install(script: &str) -> Self {
        let guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codex");
        std::fs::write(&path, script).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        let saved_path = std::env::var_os("PATH").unwrap_or_default();
        let new_path = std::env::join_paths(
            std::iter::once(dir.path().to_path_buf())
                .chain(std::env::split_paths(&saved_path)),
        )
        .unwrap();
        std::env::set_var("PATH", new_path);
        Self {
            _dir: dir,
            _guard: guard,
            saved_path,
        }
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.saved_path);
    }
}

fn ctx() -> Arc<RuntimeContext> {
    Arc::new(RuntimeContext::new(
        Logger::null(),
        SignalBridge::disconnected(),
    ))
}

fn options() -> ParallelOptions {
    ParallelOptions {
        max_workers: 2,
        default_backend: BackendFlavor::Codex,
        exec: ExecOptions::default(),
        progress: None,
    }
}

fn spec(id: &str, deps: &[&str]) -> TaskSpec {
    let mut spec = TaskSpec::new(id, "body");
    spec.dependencies = deps.iter().map(|d| d.to_string()).collect();
    spec
}

#[tokio::test]
async fn failure_skips_the_whole_dependent_chain() {
    let _fake = FakeBackend::install("#!/bin/sh\nexit 1\n");
    let tasks = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])];
    let results = run_parallel(&tasks, &ctx(), &options()).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].task_id, "a");
    assert_eq!(results[0].exit_code, 1);
    for skipped in &results[1..] {
        assert_eq!(skipped.exit_code, 1);
        assert_eq!(skipped.message, "Skipped due to dependency failure");
        assert_eq!(skipped.error, "Dependency failed");
    }
    assert_eq!(overall_exit(&results), 1);
}

#[tokio::test]
async fn diamond_runs_everything_on_success() {
    let _fake = FakeBackend::install("#!/bin/sh\necho '{\"content\":\"ok\"}'\n");
    let tasks = vec![
        spec("root", &[]),
        spec("left", &["root"]),
        spec("right", &["root"]),
        spec("join", &["left", "right"]),
    ];
    let results = run_parallel(&tasks, &ctx(), &options()).await.unwrap();

    assert_eq!(results.len(), 4);
    let order: Vec<&str> = results.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(order, vec!["root", "left", "right", "join"]);
    assert!(results.iter().all(|r| r.exit_code == 0));
    assert_eq!(overall_exit(&results), 0);
}

#[tokio::test]
async fn cycle_fails_before_spawning_anything() {
    // No stub installed: a spawn attempt would come back 127, not Err.
    let tasks = vec![spec("a", &["b"]), spec("b", &["a"])];
    let err = run_parallel(&tasks, &ctx(), &options()).await.unwrap_err();
    assert!(matches!(err, ConfigError::CycleDetected(_)));
}

#[tokio::test]
async fn unknown_dependency_fails_before_spawning() {
    let tasks = vec![spec("a", &["ghost"])];
    let err = run_parallel(&tasks, &ctx(), &options()).await.unwrap_err();
    assert!(matches!(err, ConfigError::UnknownDependency { .. }));
}

#[tokio::test]
async fn empty_task_set_yields_empty_results() {
    let results = run_parallel(&[], &ctx(), &options()).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(overall_exit(&results), 0);
}

#[tokio::test]
async fn pre_aborted_run_starts_nothing_and_omits_results() {
    let _fake = FakeBackend::install("#!/bin/sh\necho '{\"content\":\"ok\"}'\n");
    let tasks = vec![spec("a", &[]), spec("b", &["a"])];
    let mut options = options();
    let cancel = CancellationToken::new();
    cancel.cancel();
    options.exec.cancel = cancel;

    let results = run_parallel(&tasks, &ctx(), &options).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn unbounded_workers_still_complete() {
    let _fake = FakeBackend::install("#!/bin/sh\necho '{\"content\":\"ok\"}'\n");
    let tasks = vec![spec("a", &[]), spec("b", &[]), spec("c", &[])];
    let mut options = options();
    options.max_workers = 0;
    let results = run_parallel(&tasks, &ctx(), &options).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.exit_code == 0));
}
