//! Terminal-signal bridge.
//!
//! While children are running, signals aimed at the wrapper are fanned out
//! to every active execution, which forwards them to its child and marks
//! itself interrupted. One bridge exists per runtime context; executions
//! subscribe for their lifetime and unsubscribe by dropping.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGTERM: i32 = 15;

/// Conventional exit code for a process ended by `signo`: 128 + number for
/// the signals we name, 130 for anything interrupt-like.
pub fn exit_code_for_signal(signo: i32) -> i32 {
    match signo {
        SIGHUP | SIGINT | SIGQUIT | SIGTERM => 128 + signo,
        _ => 130,
    }
}

pub struct SignalBridge {
    tx: broadcast::Sender<i32>,
    last_signal: Arc<AtomicI32>,
    listener: Option<JoinHandle<()>>,
}

/// One execution's subscription to the bridge. Dropping it detaches the
/// execution; the bridge's subscriber count returns to its prior value.
pub struct SignalSubscription {
    rx: broadcast::Receiver<i32>,
}

impl SignalSubscription {
    /// Resolves when a terminal signal arrives. Returns `None` if the
    /// bridge itself has shut down.
    pub async fn recv(&mut self) -> Option<i32> {
        loop {
            match self.rx.recv().await {
                Ok(signo) => return Some(signo),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl SignalBridge {
    /// Creates the bridge and installs the OS listeners. Must be called
    /// within a tokio runtime.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(8);
        let last_signal = Arc::new(AtomicI32::new(0));
        let listener = Some(spawn_listener(tx.clone(), last_signal.clone()));
        Self {
            tx,
            last_signal,
            listener,
        }
    }

    /// A bridge that never fires; for tests and embedded callers.
    pub fn disconnected() -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            tx,
            last_signal: Arc::new(AtomicI32::new(0)),
            listener: None,
        }
    }

    pub fn subscribe(&self) -> SignalSubscription {
        SignalSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of currently attached executions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// The last signal observed, if any; drives the wrapper's own exit code.
    pub fn last_signal(&self) -> Option<i32> {
        match self.last_signal.load(Ordering::SeqCst) {
            0 => None,
            signo => Some(signo),
        }
    }

    /// Injects a signal as if delivered by the OS. Test seam.
    #[doc(hidden)]
    pub fn raise(&self, signo: i32) {
        self.last_signal.store(signo, Ordering::SeqCst);
        let _ = self.tx.send(signo);
    }
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[cfg(unix)]
fn spawn_listener(tx: broadcast::Sender<i32>, last: Arc<AtomicI32>) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to install interrupt handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to install terminate handler");
                return;
            }
        };
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to install hangup handler");
                return;
            }
        };

        loop {
            let signo = tokio::select! {
                _ = interrupt.recv() => SIGINT,
                _ = terminate.recv() => SIGTERM,
                _ = hangup.recv() => SIGHUP,
            };
            last.store(signo, Ordering::SeqCst);
            let _ = tx.send(signo);
        }
    })
}

#[cfg(not(unix))]
fn spawn_listener(tx: broadcast::Sender<i32>, last: Arc<AtomicI32>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to install ctrl-c handler");
                return;
            }
            last.store(SIGINT, Ordering::SeqCst);
            let _ = tx.send(SIGINT);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_exit_codes_follow_convention() {
        assert_eq!(exit_code_for_signal(SIGHUP), 129);
        assert_eq!(exit_code_for_signal(SIGINT), 130);
        assert_eq!(exit_code_for_signal(SIGQUIT), 131);
        assert_eq!(exit_code_for_signal(SIGTERM), 143);
        assert_eq!(exit_code_for_signal(99), 130);
    }

    #[tokio::test]
    async fn subscribe_then_drop_restores_count() {
        let bridge = SignalBridge::disconnected();
        assert_eq!(bridge.subscriber_count(), 0);
        let first = bridge.subscribe();
        let second = bridge.subscribe();
        assert_eq!(bridge.subscriber_count(), 2);
        drop(first);
        drop(second);
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn raised_signal_reaches_subscribers() {
        let bridge = SignalBridge::disconnected();
        let mut sub = bridge.subscribe();
        bridge.raise(SIGTERM);
        assert_eq!(sub.recv().await, Some(SIGTERM));
        assert_eq!(bridge.last_signal(), Some(SIGTERM));
    }
}
