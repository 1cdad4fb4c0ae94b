//! Shutdown signalling
//!
//! One `watch` channel carries the shutdown request to every per-symbol loop.
//! Loops finish the tick in progress before returning.

use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / SIGTERM
    Graceful,
    /// Requested by code (e.g. tick budget exhausted)
    Requested,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Requested => write!(f, "requested"),
        }
    }
}

/// Owner side of the shutdown channel
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn trigger(&self, signal: ShutdownSignal) {
        if !self.tx.send_replace(true) {
            info!(signal = %signal, "Shutdown requested");
        }
    }

    /// Wait for SIGINT (and SIGTERM on unix), then trigger
    pub async fn listen_for_signals(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        self.trigger(ShutdownSignal::Graceful);
    }
}

/// Resolves once shutdown has been triggered (or the handle dropped)
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_listeners() {
        let (handle, mut rx) = ShutdownHandle::new();
        let mut second = handle.subscribe();
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut second).await });

        assert!(!handle.is_triggered());
        handle.trigger(ShutdownSignal::Requested);
        waiter.await.unwrap();
        wait_for_shutdown(&mut rx).await;
        assert!(handle.is_triggered());
    }

    #[test]
    fn test_waiter_pending_until_triggered() {
        let (handle, mut rx) = ShutdownHandle::new();
        let mut waiter = tokio_test::task::spawn(async move { wait_for_shutdown(&mut rx).await });

        tokio_test::assert_pending!(waiter.poll());
        handle.trigger(ShutdownSignal::Graceful);
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_waiters() {
        let (handle, mut rx) = ShutdownHandle::new();
        drop(handle);
        wait_for_shutdown(&mut rx).await;
    }
}
