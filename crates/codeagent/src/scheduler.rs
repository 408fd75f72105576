//! Dependency-ordered parallel execution.
//!
//! Tasks are layered with Kahn's algorithm (snapshot variant: each pass over
//! the zero-in-degree frontier becomes one layer), then each layer runs
//! under a worker bound. A failed or skipped dependency converts its
//! dependents into synthesized skip results without spawning anything.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use agent_events::{BackendFlavor, ProgressUpdate};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backend::resolve_backend;
use crate::error::ConfigError;
use crate::executor::{run_task, ExecOptions, RuntimeContext};
use crate::result::TaskResult;
use crate::task::{validate_task_set, TaskSpec};

/// Layered execution order; indices refer into the caller's task slice.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DagPlan {
    pub layers: Vec<Vec<usize>>,
}

/// Layers the dependency graph. Every task lands in exactly one layer, all
/// of its dependencies in earlier ones; otherwise the graph is cyclic.
pub fn plan_layers(tasks: &[TaskSpec]) -> Result<DagPlan, ConfigError> {
    let index_of: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(idx, spec)| (spec.id.as_str(), idx))
        .collect();

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (idx, spec) in tasks.iter().enumerate() {
        for dep in &spec.dependencies {
            let Some(&dep_idx) = index_of.get(dep.as_str()) else {
                return Err(ConfigError::UnknownDependency {
                    task: spec.id.clone(),
                    dependency: dep.clone(),
                });
            };
            in_degree[idx] += 1;
            dependents[dep_idx].push(idx);
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut layers = Vec::new();
    let mut placed = 0usize;

    while !queue.is_empty() {
        // Snapshot the frontier: everything currently at zero in-degree
        // forms one layer; tasks unblocked by it belong to the next.
        let boundary = queue.len();
        let mut layer = Vec::with_capacity(boundary);
        for _ in 0..boundary {
            let idx = queue.pop_front().unwrap_or_default();
            layer.push(idx);
            placed += 1;
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        layers.push(layer);
    }

    if placed < tasks.len() {
        let stuck: Vec<&str> = tasks
            .iter()
            .enumerate()
            .filter(|(idx, _)| in_degree[*idx] > 0)
            .map(|(_, spec)| spec.id.as_str())
            .collect();
        return Err(ConfigError::CycleDetected(stuck.join(", ")));
    }

    Ok(DagPlan { layers })
}

/// Splits one layer into tasks that may run and tasks that must be skipped
/// because a dependency failed or was itself skipped.
fn partition_layer(
    layer: &[usize],
    tasks: &[TaskSpec],
    results: &HashMap<String, TaskResult>,
    skipped: &HashSet<String>,
) -> (Vec<usize>, Vec<usize>) {
    let mut runnable = Vec::new();
    let mut to_skip = Vec::new();
    for &idx in layer {
        let ok = tasks[idx].dependencies.iter().all(|dep| {
            !skipped.contains(dep)
                && results
                    .get(dep)
                    .is_some_and(|result| result.is_success())
        });
        if ok {
            runnable.push(idx);
        } else {
            to_skip.push(idx);
        }
    }
    (runnable, to_skip)
}

/// Per-task progress relay: `(task_id, update)`.
pub type TaskProgressCallback = Arc<dyn Fn(&str, &ProgressUpdate) + Send + Sync>;

pub struct ParallelOptions {
    /// Concurrent task bound; 0 means unbounded.
    pub max_workers: usize,
    /// Backend for tasks that do not name one.
    pub default_backend: BackendFlavor,
    pub exec: ExecOptions,
    pub progress: Option<TaskProgressCallback>,
}

/// Runs a task set to completion, layer by layer.
///
/// Results come back in task-definition order. Tasks never started because
/// the run was aborted are absent from the output; callers observe a
/// truncated list rather than fabricated results.
pub async fn run_parallel(
    tasks: &[TaskSpec],
    ctx: &Arc<RuntimeContext>,
    opts: &ParallelOptions,
) -> Result<Vec<TaskResult>, ConfigError> {
    validate_task_set(tasks)?;
    let plan = plan_layers(tasks)?;
    debug!(tasks = tasks.len(), layers = plan.layers.len(), "layered task graph");

    let mut results: HashMap<String, TaskResult> = HashMap::new();
    let mut skipped: HashSet<String> = HashSet::new();

    let worker_permits = if opts.max_workers == 0 {
        Semaphore::MAX_PERMITS
    } else {
        opts.max_workers
    };
    let semaphore = Arc::new(Semaphore::new(worker_permits));

    'layers: for layer in &plan.layers {
        let (runnable, to_skip) = partition_layer(layer, tasks, &results, &skipped);
        for idx in to_skip {
            let id = tasks[idx].id.clone();
            debug!(task = %id, "skipped: dependency failed");
            ctx.logger
                .warn(format!("task {id}: skipped, dependency failed"));
            skipped.insert(id.clone());
            results.insert(id.clone(), TaskResult::skipped(id));
        }

        let mut inflight = JoinSet::new();
        for &idx in &runnable {
            if opts.exec.cancel.is_cancelled() {
                // Queued work is abandoned, not recorded.
                break;
            }
            let spec = tasks[idx].clone();
            let flavor = if spec.backend_name.is_empty() {
                opts.default_backend
            } else {
                resolve_backend(&spec.backend_name)?
            };
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let mut exec = opts.exec.clone();
            if let Some(progress) = opts.progress.clone() {
                let id = spec.id.clone();
                exec.progress = Some(Arc::new(move |update: &ProgressUpdate| {
                    progress(&id, update)
                }));
            }
            inflight.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if exec.cancel.is_cancelled() {
                    return None;
                }
                Some(run_task(&spec, flavor, &ctx, &exec).await)
            });
        }

        while let Some(joined) = inflight.join_next().await {
            match joined {
                Ok(Some(result)) => {
                    results.insert(result.task_id.clone(), result);
                }
                Ok(None) => {}
                Err(err) => {
                    // A panicking task body releases its slot with it; the
                    // run carries on without that task's result.
                    warn!(%err, "task body failed to join");
                }
            }
        }

        if opts.exec.cancel.is_cancelled() {
            break 'layers;
        }
    }

    Ok(tasks
        .iter()
        .filter_map(|spec| results.remove(spec.id.as_str()))
        .collect())
}

/// `(succeeded, failed)` counts over a result list.
pub fn summarize(results: &[TaskResult]) -> (usize, usize) {
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    (succeeded, results.len() - succeeded)
}

/// Zero iff every recorded result succeeded.
pub fn overall_exit(results: &[TaskResult]) -> i32 {
    if results.iter().all(TaskResult::is_success) {
        crate::error::exit::OK
    } else {
        crate::error::exit::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        let mut spec = TaskSpec::new(id, "body");
        spec.dependencies = deps.iter().map(|d| d.to_string()).collect();
        spec
    }

    #[test]
    fn layers_respect_dependencies_and_order() {
        let tasks = vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
            spec("e", &[]),
        ];
        let plan = plan_layers(&tasks).unwrap();
        assert_eq!(plan.layers, vec![vec![0, 4], vec![1, 2], vec![3]]);
    }

    #[test]
    fn single_task_is_one_layer() {
        let plan = plan_layers(&[spec("only", &[])]).unwrap();
        assert_eq!(plan.layers, vec![vec![0]]);
    }

    #[test]
    fn empty_set_has_no_layers() {
        let plan = plan_layers(&[]).unwrap();
        assert!(plan.layers.is_empty());
    }

    #[test]
    fn cycle_is_detected() {
        let tasks = vec![spec("a", &["b"]), spec("b", &["a"])];
        assert!(matches!(
            plan_layers(&tasks),
            Err(ConfigError::CycleDetected(_))
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        assert!(matches!(
            plan_layers(&[spec("a", &["a"])]),
            Err(ConfigError::CycleDetected(_))
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        assert!(matches!(
            plan_layers(&[spec("a", &["ghost"])]),
            Err(ConfigError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn partition_skips_dependents_of_failures() {
        let tasks = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &[])];
        let mut results = HashMap::new();
        results.insert(
            "a".to_string(),
            TaskResult {
                task_id: "a".to_string(),
                exit_code: 1,
                ..TaskResult::default()
            },
        );
        let skipped = HashSet::new();
        let (runnable, to_skip) = partition_layer(&[1, 2], &tasks, &results, &skipped);
        assert_eq!(runnable, vec![2]);
        assert_eq!(to_skip, vec![1]);
    }

    #[test]
    fn partition_propagates_through_skips() {
        let tasks = vec![spec("b", &["a"]), spec("c", &["b"])];
        let mut results = HashMap::new();
        results.insert("b".to_string(), TaskResult::skipped("b"));
        let mut skipped = HashSet::new();
        skipped.insert("b".to_string());
        let (runnable, to_skip) = partition_layer(&[1], &tasks, &results, &skipped);
        assert!(runnable.is_empty());
        assert_eq!(to_skip, vec![1]);
    }

    #[test]
    fn summary_counts() {
        let results = vec![
            TaskResult::success("a"),
            TaskResult::skipped("b"),
            TaskResult::success("c"),
        ];
        assert_eq!(summarize(&results), (2, 1));
        assert_eq!(overall_exit(&results), 1);
        assert_eq!(overall_exit(&[]), 0);
    }
}
