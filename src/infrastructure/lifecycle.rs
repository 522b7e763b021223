//! Lifecycle Orchestrator
//!
//! Drives the service through `Booting -> Serving -> Draining -> Stopped`.
//! The drain deadline is a hard bound: `serve` always returns.

use crate::infrastructure::shutdown::{ShutdownController, ShutdownTrigger};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Booting,
    Serving,
    Draining,
    Stopped,
}

/// How the serving phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished before the drain deadline
    Clean,
    /// The drain deadline passed; the serving task was aborted
    Forced { in_flight: usize },
    /// The serving loop stopped on its own
    ServerFailed(String),
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Forced { .. } => 1,
            Self::ServerFailed(_) => 2,
        }
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send + Sync>;

pub struct LifecycleOrchestrator {
    drain_deadline: Duration,
    controller: ShutdownController,
    phase_tx: watch::Sender<LifecyclePhase>,
    hooks: Vec<ShutdownHook>,
}

impl LifecycleOrchestrator {
    pub fn new(drain_deadline: Duration) -> Self {
        let (phase_tx, _) = watch::channel(LifecyclePhase::Booting);
        Self {
            drain_deadline,
            controller: ShutdownController::new(),
            phase_tx,
            hooks: Vec::new(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase_tx.borrow()
    }

    /// Observe phase transitions.
    pub fn phase_watch(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_tx.subscribe()
    }

    pub fn controller(&self) -> &ShutdownController {
        &self.controller
    }

    /// Run `hook` once the serving loop is gone, in registration order.
    pub fn on_shutdown<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    fn enter(&self, phase: LifecyclePhase) {
        let previous = self.phase_tx.send_replace(phase);
        tracing::debug!(from = ?previous, to = ?phase, "lifecycle transition");
    }

    /// Serve `app` on `listener` until `termination` resolves or the
    /// serving loop dies, then drain within the deadline and stop.
    ///
    /// A forced drain aborts only the accept loop. Connection tasks already
    /// spawned by the server keep running until the runtime goes away, so
    /// shutdown hooks may release resources underneath them: such requests
    /// see a closed pool, not a dangling one. The binary exits right after.
    pub async fn serve<T>(self, listener: TcpListener, app: Router, termination: T) -> ShutdownOutcome
    where
        T: Future<Output = ShutdownTrigger>,
    {
        let app = app.layer(middleware::from_fn_with_state(
            self.controller.clone(),
            track_in_flight,
        ));
        let local_addr = listener.local_addr().ok();
        let cancelled = self.controller.cancelled();

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancelled)
                .await
        });

        self.enter(LifecyclePhase::Serving);
        tracing::info!(addr = ?local_addr, "serving requests");

        tokio::pin!(termination);
        let early_exit = tokio::select! {
            trigger = &mut termination => {
                tracing::info!(%trigger, in_flight = self.controller.in_flight(), "termination requested, draining");
                None
            }
            joined = &mut server => Some(joined),
        };

        self.enter(LifecyclePhase::Draining);
        self.controller.shutdown();

        let outcome = match early_exit {
            Some(joined) => {
                let reason = match joined {
                    Ok(Ok(())) => "serving loop exited unexpectedly".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                ShutdownOutcome::ServerFailed(reason)
            }
            None => match tokio::time::timeout(self.drain_deadline, &mut server).await {
                Ok(Ok(Ok(()))) => ShutdownOutcome::Clean,
                Ok(Ok(Err(e))) => ShutdownOutcome::ServerFailed(e.to_string()),
                Ok(Err(e)) => ShutdownOutcome::ServerFailed(e.to_string()),
                Err(_) => {
                    let in_flight = self.controller.in_flight();
                    server.abort();
                    ShutdownOutcome::Forced { in_flight }
                }
            },
        };

        self.stop(outcome)
    }

    fn stop(mut self, outcome: ShutdownOutcome) -> ShutdownOutcome {
        for hook in self.hooks.drain(..) {
            hook();
        }
        self.enter(LifecyclePhase::Stopped);

        match &outcome {
            ShutdownOutcome::Clean => tracing::info!("shutdown complete"),
            ShutdownOutcome::Forced { in_flight } => tracing::warn!(
                in_flight,
                deadline = ?self.drain_deadline,
                "forced shutdown: drain deadline exceeded"
            ),
            ShutdownOutcome::ServerFailed(reason) => {
                tracing::error!(error = %reason, "serving loop failed")
            }
        }
        outcome
    }
}

/// Counts requests in flight; refuses new work once draining.
async fn track_in_flight(
    State(controller): State<ShutdownController>,
    request: Request,
    next: Next,
) -> Response {
    if controller.is_shutdown() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONNECTION, "close")],
            "server is shutting down",
        )
            .into_response();
    }

    let _guard = controller.request_guard();
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tower::ServiceExt;
    use tracing_test::traced_test;

    fn slow_app(delay: Duration) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/slow",
                get(move || async move {
                    tokio::time::sleep(delay).await;
                    "done"
                }),
            )
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        (listener, addr)
    }

    async fn wait_for_in_flight(controller: &ShutdownController, n: usize) {
        for _ in 0..200 {
            if controller.in_flight() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("request never became in flight");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownOutcome::Clean.exit_code(), 0);
        assert_eq!(ShutdownOutcome::Forced { in_flight: 2 }.exit_code(), 1);
        assert_eq!(
            ShutdownOutcome::ServerFailed("boom".to_string()).exit_code(),
            2
        );
    }

    #[test]
    fn test_starts_booting() {
        let orchestrator = LifecycleOrchestrator::new(Duration::from_secs(1));
        assert_eq!(orchestrator.phase(), LifecyclePhase::Booting);
        assert!(!orchestrator.controller().is_shutdown());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_clean_shutdown_runs_hooks_and_stops() {
        let (listener, addr) = bind().await;
        let mut orchestrator = LifecycleOrchestrator::new(Duration::from_secs(1));
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        orchestrator.on_shutdown(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let phases = orchestrator.phase_watch();
        let phase_while_serving = phases.clone();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let client = tokio::spawn(async move {
            let body = reqwest::get(format!("{addr}/")).await.unwrap().text().await.unwrap();
            let phase = *phase_while_serving.borrow();
            stop_tx.send(()).unwrap();
            (body, phase)
        });

        let outcome = orchestrator
            .serve(listener, slow_app(Duration::ZERO), async move {
                let _ = stop_rx.await;
                ShutdownTrigger::Requested
            })
            .await;
        let (body, phase) = client.await.unwrap();

        assert_eq!(body, "ok");
        assert_eq!(phase, LifecyclePhase::Serving);
        assert_eq!(outcome, ShutdownOutcome::Clean);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*phases.borrow(), LifecyclePhase::Stopped);
        assert!(logs_contain("shutdown complete"));
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_request() {
        let (listener, addr) = bind().await;
        let orchestrator = LifecycleOrchestrator::new(Duration::from_secs(2));
        let controller = orchestrator.controller().clone();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(orchestrator.serve(
            listener,
            slow_app(Duration::from_millis(100)),
            async move {
                let _ = stop_rx.await;
                ShutdownTrigger::Requested
            },
        ));

        let request = tokio::spawn(async move { reqwest::get(format!("{addr}/slow")).await });
        wait_for_in_flight(&controller, 1).await;
        stop_tx.send(()).unwrap();

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "done");
        assert_eq!(serving.await.unwrap(), ShutdownOutcome::Clean);
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drain_deadline_forces_stop() {
        let (listener, addr) = bind().await;
        let mut orchestrator = LifecycleOrchestrator::new(Duration::from_millis(100));
        let controller = orchestrator.controller().clone();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = hook_calls.clone();
        orchestrator.on_shutdown(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        let _request = tokio::spawn(async move { reqwest::get(format!("{addr}/slow")).await });
        let termination = async move {
            wait_for_in_flight(&controller, 1).await;
            ShutdownTrigger::Requested
        };

        let started = std::time::Instant::now();
        let outcome = orchestrator
            .serve(listener, slow_app(Duration::from_secs(10)), termination)
            .await;

        assert_eq!(outcome, ShutdownOutcome::Forced { in_flight: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("forced shutdown"));
    }

    #[tokio::test]
    async fn test_forced_drain_leaves_straggler_after_hooks() {
        use std::sync::atomic::AtomicBool;

        let (listener, addr) = bind().await;
        let mut orchestrator = LifecycleOrchestrator::new(Duration::from_millis(100));
        let controller = orchestrator.controller().clone();
        let hook_ran = Arc::new(AtomicBool::new(false));
        let saw_hook = Arc::new(AtomicBool::new(false));

        let flag = hook_ran.clone();
        orchestrator.on_shutdown(move || flag.store(true, Ordering::SeqCst));

        let (hook_flag, seen) = (hook_ran.clone(), saw_hook.clone());
        let app = Router::new().route(
            "/straggler",
            get(move || {
                let (hook_flag, seen) = (hook_flag.clone(), seen.clone());
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    seen.store(hook_flag.load(Ordering::SeqCst), Ordering::SeqCst);
                    "late"
                }
            }),
        );

        let _request = tokio::spawn(async move { reqwest::get(format!("{addr}/straggler")).await });
        let termination = async move {
            wait_for_in_flight(&controller, 1).await;
            ShutdownTrigger::Requested
        };

        let outcome = orchestrator.serve(listener, app, termination).await;
        assert_eq!(outcome, ShutdownOutcome::Forced { in_flight: 1 });
        assert!(hook_ran.load(Ordering::SeqCst));

        // The connection task outlives the aborted accept loop.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(saw_hook.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_new_work_rejected_while_draining() {
        let controller = ShutdownController::new();
        let app = slow_app(Duration::ZERO).layer(middleware::from_fn_with_state(
            controller.clone(),
            track_in_flight,
        ));

        let request = || {
            axum::http::Request::builder()
                .uri("/")
                .body(axum::body::Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        controller.shutdown();
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
