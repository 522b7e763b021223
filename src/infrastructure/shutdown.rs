//! Graceful Shutdown Handler
//!
//! Broadcast cancellation plus in-flight request accounting for the
//! serving loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// What ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Programmatic request (embedding code, tests)
    Requested,
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Interrupt => "interrupt (SIGINT)",
            Self::Terminate => "terminate (SIGTERM)",
            Self::Requested => "requested",
        };
        f.write_str(s)
    }
}

/// Shutdown coordinator for graceful termination.
///
/// The orchestrator fires it once; the serving loop and the in-flight
/// middleware observe it.
#[derive(Clone)]
pub struct ShutdownController {
    initiated: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Subscribe to the cancellation broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Future that resolves once shutdown has been initiated.
    ///
    /// Resolves immediately when shutdown already happened before the call.
    pub fn cancelled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let initiated = self.initiated.clone();
        async move {
            if initiated.load(Ordering::SeqCst) {
                return;
            }
            // Closed or lagged both mean the sender fired.
            let _ = rx.recv().await;
        }
    }

    /// Initiate shutdown. Returns `false` if it was already initiated.
    pub fn shutdown(&self) -> bool {
        if self.initiated.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(in_flight = self.in_flight(), "broadcasting shutdown");
        let _ = self.shutdown_tx.send(());
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Count a request as in flight until the guard is dropped.
    pub fn request_guard(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            in_flight: self.in_flight.clone(),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one in-flight request.
pub struct RequestGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still does.
pub async fn termination_signal() -> ShutdownTrigger {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownTrigger::Interrupt,
        _ = terminate => ShutdownTrigger::Terminate,
    }
}
