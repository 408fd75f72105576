//! Environment-driven configuration snapshot.

use std::time::Duration;

use crate::process::STDERR_BUFFER_SIZE;

pub const DEFAULT_LOGGER_QUEUE_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Wrapper configuration as read from the environment. CLI flags override
/// individual fields afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-task timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub skip_permissions: bool,
    /// Worker bound for parallel runs; 0 means unbounded.
    pub max_workers: usize,
    pub quiet: bool,
    pub ascii_mode: bool,
    /// Mirror backend stderr lines to the wrapper's stderr.
    pub backend_output: bool,
    pub debug: bool,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub stderr_buffer_size: usize,
    pub logger_queue_size: usize,
    pub logger_flush_interval: Duration,
    pub logger_close_timeout: Duration,
    pub performance_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: None,
            skip_permissions: false,
            max_workers: 0,
            quiet: false,
            ascii_mode: false,
            backend_output: false,
            debug: false,
            backend: None,
            model: None,
            stderr_buffer_size: STDERR_BUFFER_SIZE,
            logger_queue_size: DEFAULT_LOGGER_QUEUE_SIZE,
            logger_flush_interval: DEFAULT_FLUSH_INTERVAL,
            logger_close_timeout: DEFAULT_CLOSE_TIMEOUT,
            performance_metrics: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(timeout) = std::env::var("CODEX_TIMEOUT")
            .ok()
            .and_then(|raw| parse_timeout(&raw))
        {
            config.timeout = Some(timeout);
        }
        config.skip_permissions = env_flag("CODEAGENT_SKIP_PERMISSIONS");
        if let Some(workers) = env_parse::<usize>("CODEAGENT_MAX_PARALLEL_WORKERS") {
            config.max_workers = workers;
        }
        config.quiet = env_flag("CODEAGENT_QUIET");
        config.ascii_mode = env_flag("CODEAGENT_ASCII_MODE");
        config.backend_output = env_flag("CODEAGENT_BACKEND_OUTPUT");
        config.debug = env_flag("CODEAGENT_DEBUG");
        config.backend = env_nonempty("CODEAGENT_BACKEND");
        config.model = env_nonempty("CODEAGENT_MODEL");
        if let Some(size) = env_parse::<usize>("CODEAGENT_STDERR_BUFFER_SIZE") {
            if size > 0 {
                config.stderr_buffer_size = size;
            }
        }
        if let Some(size) = env_parse::<usize>("CODEAGENT_LOGGER_QUEUE_SIZE") {
            if size > 0 {
                config.logger_queue_size = size;
            }
        }
        if let Some(ms) = env_parse::<u64>("CODEAGENT_LOGGER_FLUSH_INTERVAL_MS") {
            if ms > 0 {
                config.logger_flush_interval = Duration::from_millis(ms);
            }
        }
        if let Some(ms) = env_parse::<u64>("CODEAGENT_LOGGER_CLOSE_TIMEOUT_MS") {
            config.logger_close_timeout = Duration::from_millis(ms);
        }
        config.performance_metrics = env_flag("CODEAGENT_PERFORMANCE_METRICS");

        config
    }
}

/// Parses `CODEX_TIMEOUT`: a count of seconds, except that implausibly large
/// values (over 10 000) are taken as milliseconds.
pub fn parse_timeout(raw: &str) -> Option<Duration> {
    let value: u64 = raw.trim().parse().ok()?;
    if value == 0 {
        return None;
    }
    Some(if value > 10_000 {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => !matches!(value.as_str(), "" | "0" | "false"),
        Err(_) => false,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
