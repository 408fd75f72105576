//! Asynchronous, bounded-queue log sink.
//!
//! Callers submit level-tagged lines and never wait for I/O. A single
//! flusher task drains the queue to an append-only file: immediately for
//! WARN/ERROR, on queue-full for INFO/DEBUG, and on a periodic tick
//! otherwise. Because one task owns the sink, a flush is never re-entered
//! while a previous write is still outstanding.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// In-memory retention of recent WARN/ERROR lines for diagnostic recall.
const RECALL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    timestamp: String,
    level: LogLevel,
    text: String,
}

impl Entry {
    fn format(&self) -> String {
        format!("[{}] [{}] {}", self.timestamp, self.level.as_str(), self.text)
    }
}

struct Inner {
    queue: Mutex<VecDeque<Entry>>,
    capacity: usize,
    recall: Mutex<VecDeque<Entry>>,
    flush_signal: Notify,
    pending_writes: AtomicUsize,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    close_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Options for opening a file-backed logger.
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub queue_capacity: usize,
    pub flush_interval: Duration,
    pub close_timeout: Duration,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            queue_capacity: crate::config::DEFAULT_LOGGER_QUEUE_SIZE,
            flush_interval: crate::config::DEFAULT_FLUSH_INTERVAL,
            close_timeout: crate::config::DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Process-wide log sink. Cloning shares the sink; the null logger is the
/// same type with no backing file, so silent mode needs no special casing
/// at call sites.
#[derive(Clone)]
pub struct Logger {
    inner: Option<Arc<Inner>>,
    path: Option<PathBuf>,
}

impl Logger {
    /// A logger that accepts and discards everything.
    pub fn null() -> Self {
        Self {
            inner: None,
            path: None,
        }
    }

    /// Opens `<dir>/<wrapper>-<pid>[-<suffix>].log` for append and starts
    /// the flusher task. Must be called within a tokio runtime.
    pub fn open(
        dir: &Path,
        wrapper: &str,
        suffix: Option<&str>,
        options: LoggerOptions,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut name = format!("{wrapper}-{}", std::process::id());
        if let Some(suffix) = suffix {
            name.push('-');
            name.push_str(suffix);
        }
        name.push_str(".log");
        let path = dir.join(name);

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            capacity: options.queue_capacity.max(1),
            recall: Mutex::new(VecDeque::new()),
            flush_signal: Notify::new(),
            pending_writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            shutdown,
            close_timeout: options.close_timeout,
            worker: Mutex::new(None),
        });

        let worker = tokio::spawn(run_flusher(
            inner.clone(),
            tokio::fs::File::from_std(file),
            options.flush_interval,
            shutdown_rx,
        ));
        *inner.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);

        debug!(path = %path.display(), "log sink opened");
        Ok(Self {
            inner: Some(inner),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, level: LogLevel, text: impl Into<String>) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let entry = Entry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            text: text.into(),
        };

        if matches!(level, LogLevel::Warn | LogLevel::Error) {
            let mut recall = inner.recall.lock().unwrap_or_else(|e| e.into_inner());
            recall.push_back(entry.clone());
            // Trim in batches so the hot path rarely reallocates.
            if recall.len() >= RECALL_CAPACITY * 2 {
                let excess = recall.len() - RECALL_CAPACITY;
                recall.drain(..excess);
            }
        }

        let should_flush = {
            let mut queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push_back(entry);
            matches!(level, LogLevel::Warn | LogLevel::Error) || queue.len() >= inner.capacity
        };
        if should_flush {
            inner.flush_signal.notify_one();
        }
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(LogLevel::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(LogLevel::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.log(LogLevel::Warn, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(LogLevel::Error, text);
    }

    /// The retained WARN/ERROR lines, oldest first.
    pub fn recent_errors(&self) -> Vec<String> {
        let Some(inner) = self.inner.as_deref() else {
            return Vec::new();
        };
        let recall = inner.recall.lock().unwrap_or_else(|e| e.into_inner());
        recall.iter().map(Entry::format).collect()
    }

    /// Flushes what is queued, waits for outstanding writes up to the close
    /// timeout, and ends the sink. Subsequent submissions are dropped; a
    /// second close is a no-op.
    pub async fn close(&self) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = inner.shutdown.send(true);

        let worker = inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if tokio::time::timeout(inner.close_timeout, worker)
                .await
                .is_err()
            {
                warn!("log sink close timed out; forcing shutdown");
            }
        }
    }

    /// Writes currently in flight; zero once everything queued has reached
    /// the sink.
    pub fn pending_writes(&self) -> usize {
        self.inner
            .as_deref()
            .map(|inner| inner.pending_writes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

async fn run_flusher(
    inner: Arc<Inner>,
    mut file: tokio::fs::File,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.flush_signal.notified() => {
                flush(&inner, &mut file).await;
            }
            _ = ticker.tick() => {
                flush(&inner, &mut file).await;
            }
            _ = shutdown.changed() => {
                flush(&inner, &mut file).await;
                let _ = file.flush().await;
                return;
            }
        }
    }
}

async fn flush(inner: &Inner, file: &mut tokio::fs::File) {
    let drained: Vec<Entry> = {
        let mut queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.drain(..).collect()
    };
    if drained.is_empty() {
        return;
    }

    let mut payload = drained
        .iter()
        .map(Entry::format)
        .collect::<Vec<_>>()
        .join("\n");
    payload.push('\n');

    inner.pending_writes.fetch_add(1, Ordering::SeqCst);
    if let Err(err) = file.write_all(payload.as_bytes()).await {
        // Sink errors never propagate to callers; fall back to stderr.
        eprintln!("codeagent: log write failed: {err}");
    }
    inner.pending_writes.fetch_sub(1, Ordering::SeqCst);
}

/// The per-user log directory: `<home>/.codeagent/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".codeagent").join("logs"))
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    let var = "HOME";
    #[cfg(not(unix))]
    let var = "USERPROFILE";
    std::env::var_os(var).map(PathBuf::from)
}

/// Deletes log files left behind by wrapper processes that are no longer
/// alive. Symlinks and entries that resolve outside the log directory are
/// refused. Returns the number of files removed.
pub fn cleanup_stale_logs(dir: &Path) -> std::io::Result<usize> {
    let canonical_dir = dir.canonicalize()?;
    let mut removed = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let meta = std::fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() || !meta.is_file() {
            continue;
        }
        match path.canonicalize() {
            Ok(resolved) if resolved.starts_with(&canonical_dir) => {}
            _ => continue,
        }

        let Some(pid) = pid_from_log_name(&path) else {
            continue;
        };
        if pid == std::process::id() || pid_is_alive(pid) {
            continue;
        }
        if std::fs::remove_file(&path).is_ok() {
            debug!(path = %path.display(), pid, "removed stale log");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Extracts the pid from a `<wrapper>-<pid>[-<suffix>].log` filename. The
/// wrapper name may itself contain dashes, so the first all-digit segment
/// wins.
fn pid_from_log_name(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension()?.to_str()? != "log" {
        return None;
    }
    stem.split('-').find_map(|part| {
        (!part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
            .then(|| part.parse().ok())
            .flatten()
    })
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // SAFETY: kill(2) with signal 0 only performs the existence check.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No cheap probe; err on the side of keeping files.
    true
}
