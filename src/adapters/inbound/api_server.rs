//! HTTP API Server
//!
//! Health probes, request statistics and the small user API, behind the
//! shared middleware stack.

use crate::application::{HealthAggregator, UserService, UserServiceError};
use crate::domain::value_objects::HealthStatus;
use crate::infrastructure::stats::StatsCollector;
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
    CompressionLevel,
};

const SERVER_HEADER: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthAggregator>,
    pub users: Arc<UserService>,
    pub stats: Arc<StatsCollector>,
    /// Deadline handed to health probes
    pub health_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl ApiState {
    pub fn new(health: HealthAggregator, users: UserService) -> Self {
        Self {
            health: Arc::new(health),
            users: Arc::new(users),
            stats: Arc::new(StatsCollector::new()),
            health_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, health_timeout: Duration, request_timeout: Duration) -> Self {
        self.health_timeout = health_timeout;
        self.request_timeout = request_timeout;
        self
    }
}

/// Response envelope for the `/api/v1` routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn envelope<T: Serialize>(status: StatusCode, data: Option<T>) -> Response {
    let body = Envelope {
        code: status.as_u16(),
        message: status.canonical_reason().unwrap_or("Unknown").to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

/// Register request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub name: String,
}

impl IntoResponse for UserServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            UserServiceError::MissingName => StatusCode::BAD_REQUEST,
            UserServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            UserServiceError::Storage(e) => {
                tracing::error!(error = %e, "user storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        envelope(status, Some(self.to_string()))
    }
}

/// HTTP status for a composite health verdict.
pub fn status_code_for(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::PARTIAL_CONTENT,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Build the router with its middleware stack (outermost first).
///
/// Stats sit outside the timeout and panic layers so their 408 and 500
/// responses are counted too.
pub fn router(state: ApiState) -> Router {
    let layers = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(
            state.stats.clone(),
            record_stats,
        ))
        .layer(CompressionLayer::new().quality(CompressionLevel::Precise(5)))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_HEADER),
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/healthcheck", get(stats_handler))
        .route("/api/v1/", get(welcome_handler))
        .route("/api/v1/users", post(register_user_handler))
        .route("/api/v1/users/:id", get(get_user_handler))
        .layer(layers)
        .with_state(state)
}

async fn record_stats(
    State(stats): State<Arc<StatsCollector>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    stats.record_completion(response.status().as_u16());
    response
}

// Handler functions

async fn root_handler() -> String {
    format!(
        "{} {} is running",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

async fn welcome_handler() -> &'static str {
    "Welcome to the boiler-api v1"
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let deadline = Instant::now() + state.health_timeout;
    let report = state.health.run_all(deadline).await;
    (status_code_for(report.status), Json(report))
}

async fn liveness_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.health.liveness())
}

async fn readiness_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let deadline = Instant::now() + state.health_timeout;
    let report = state.health.readiness(deadline).await;
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn register_user_handler(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return envelope(StatusCode::BAD_REQUEST, Some(rejection.body_text())),
    };

    match state.users.register_user(&req.name).await {
        Ok(user) => envelope(StatusCode::OK, Some(user)),
        Err(e) => e.into_response(),
    }
}

async fn get_user_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<i64>() else {
        return envelope(StatusCode::BAD_REQUEST, Some(format!("invalid user id: {id}")));
    };

    match state.users.get_user(id).await {
        Ok(user) => envelope(StatusCode::OK, Some(user)),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::SqliteUserRepository;
    use crate::application::CheckerRegistry;
    use crate::domain::entities::{HealthCheck, NewUser, ProbeTimer, User};
    use crate::domain::ports::{HealthChecker, RepositoryError, UserRepository};
    use crate::infrastructure::connection_pool::ConnectionHandle;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct FixedChecker {
        name: &'static str,
        status: HealthStatus,
    }

    #[async_trait]
    impl HealthChecker for FixedChecker {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, _deadline: Instant) -> HealthCheck {
            ProbeTimer::start(self.name).finish(self.status, "fixed")
        }
    }

    /// Never answers on its own.
    struct HangingChecker;

    #[async_trait]
    impl HealthChecker for HangingChecker {
        fn name(&self) -> &str {
            "database"
        }

        async fn check(&self, _deadline: Instant) -> HealthCheck {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ProbeTimer::start("database").finish(HealthStatus::Healthy, "late")
        }
    }

    struct PanickingRepo;

    #[async_trait]
    impl UserRepository for PanickingRepo {
        async fn save(&self, _user: NewUser) -> Result<User, RepositoryError> {
            panic!("storage driver bug")
        }

        async fn find_by_id(&self, _id: i64) -> Result<Option<User>, RepositoryError> {
            panic!("storage driver bug")
        }
    }

    struct TestApp {
        _dir: TempDir,
        handle: ConnectionHandle,
        router: Router,
    }

    async fn create_test_app(database: HealthStatus, memory: HealthStatus) -> TestApp {
        let dir = TempDir::new().unwrap();
        let handle = ConnectionHandle::open(dir.path().join("api.db")).await.unwrap();
        let repo = SqliteUserRepository::new(handle.clone());
        repo.migrate().await.unwrap();

        let mut registry = CheckerRegistry::new();
        registry
            .register_dependency(Arc::new(FixedChecker {
                name: "database",
                status: database,
            }))
            .unwrap()
            .register(Arc::new(FixedChecker {
                name: "memory",
                status: memory,
            }))
            .unwrap();

        let state = ApiState::new(
            HealthAggregator::new(registry, "boiler-api", "0.1.0"),
            UserService::new(Arc::new(repo)),
        );
        TestApp {
            _dir: dir,
            handle,
            router: router(state),
        }
    }

    async fn healthy_app() -> TestApp {
        create_test_app(HealthStatus::Healthy, HealthStatus::Healthy).await
    }

    fn get_request(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_status_code_for() {
        assert_eq!(status_code_for(HealthStatus::Healthy), StatusCode::OK);
        assert_eq!(status_code_for(HealthStatus::Degraded), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            status_code_for(HealthStatus::Unhealthy),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_root_banner() {
        let app = healthy_app().await;
        let response = app.router.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.starts_with("boiler-api"));
    }

    #[tokio::test]
    async fn test_welcome() {
        let app = healthy_app().await;
        let response = app.router.oneshot(get_request("/api/v1/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Welcome"));
    }

    #[tokio::test]
    async fn test_health_all_healthy() {
        let app = healthy_app().await;
        let response = app.router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "boiler-api");
        assert_eq!(json["checks"][0]["name"], "database");
        assert_eq!(json["checks"][1]["name"], "memory");
    }

    #[tokio::test]
    async fn test_health_degraded_is_partial_content() {
        let app = create_test_app(HealthStatus::Healthy, HealthStatus::Degraded).await;
        let response = app.router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn test_health_unhealthy_is_service_unavailable() {
        let app = create_test_app(HealthStatus::Unhealthy, HealthStatus::Degraded).await;
        let response = app.router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_liveness_ignores_checkers() {
        let app = create_test_app(HealthStatus::Unhealthy, HealthStatus::Unhealthy).await;
        let response = app.router.oneshot(get_request("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "alive");
        assert_eq!(json["service"], "boiler-api");
        assert!(json["uptime"].is_string());
    }

    #[tokio::test]
    async fn test_readiness_follows_dependency_only() {
        let app = create_test_app(HealthStatus::Healthy, HealthStatus::Unhealthy).await;
        let response = app.router.oneshot(get_request("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ready"}));

        let app = create_test_app(HealthStatus::Unhealthy, HealthStatus::Healthy).await;
        let response = app.router.oneshot(get_request("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": "not ready", "reason": "database not accessible"})
        );
    }

    #[tokio::test]
    async fn test_healthcheck_counts_completed_requests() {
        let app = healthy_app().await;
        app.router.clone().oneshot(get_request("/")).await.unwrap();
        app.router
            .clone()
            .oneshot(get_request("/api/v1/users/abc"))
            .await
            .unwrap();

        let response = app.router.oneshot(get_request("/healthcheck")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["requestCount"], 2);
        assert_eq!(json["statuses"]["OK"], 1);
        assert_eq!(json["statuses"]["Bad Request"], 1);
    }

    #[tokio::test]
    async fn test_server_and_request_id_headers() {
        let app = healthy_app().await;
        let response = app.router.oneshot(get_request("/health/live")).await.unwrap();

        assert_eq!(response.headers()[header::SERVER], SERVER_HEADER);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_propagated() {
        let app = healthy_app().await;
        let request = HttpRequest::builder()
            .uri("/health/live")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn test_register_then_get_user() {
        let app = healthy_app().await;

        let response = app
            .router
            .clone()
            .oneshot(post_json("/api/v1/users", r#"{"name":"Ada"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created: Envelope<User> =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(created.code, 200);
        assert_eq!(created.message, "OK");
        let user = created.data.unwrap();
        assert_eq!(user.name, "Ada");

        let response = app
            .router
            .oneshot(get_request(&format!("/api/v1/users/{}", user.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: Envelope<User> = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(fetched.data.unwrap(), user);
    }

    #[tokio::test]
    async fn test_register_empty_name_is_bad_request() {
        let app = healthy_app().await;
        let response = app
            .router
            .oneshot(post_json("/api/v1/users", r#"{"name":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["code"], 400);
        assert_eq!(json["data"], "name is required");
    }

    #[tokio::test]
    async fn test_register_malformed_json_is_bad_request() {
        let app = healthy_app().await;
        let response = app
            .router
            .oneshot(post_json("/api/v1/users", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Bad Request");
    }

    #[tokio::test]
    async fn test_register_storage_failure_is_internal_error() {
        let app = healthy_app().await;
        app.handle.close();

        let response = app
            .router
            .oneshot(post_json("/api/v1/users", r#"{"name":"Ada"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["code"], 500);
    }

    #[tokio::test]
    async fn test_get_user_invalid_id() {
        let app = healthy_app().await;
        let response = app
            .router
            .oneshot(get_request("/api/v1/users/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let app = healthy_app().await;
        let response = app
            .router
            .oneshot(get_request("/api/v1/users/404"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Not Found");
        assert_eq!(json["data"], "user 404 not found");
    }

    #[tokio::test]
    async fn test_timed_out_request_is_counted() {
        let mut registry = CheckerRegistry::new();
        registry.register_dependency(Arc::new(HangingChecker)).unwrap();
        let state = ApiState::new(
            HealthAggregator::new(registry, "boiler-api", "0.1.0"),
            UserService::new(Arc::new(PanickingRepo)),
        )
        .with_timeouts(Duration::from_secs(30), Duration::from_millis(50));
        let app = router(state);

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let json = body_json(app.oneshot(get_request("/healthcheck")).await.unwrap()).await;
        assert_eq!(json["requestCount"], 1);
        assert_eq!(json["statuses"]["Request Timeout"], 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recovered_and_counted() {
        let state = ApiState::new(
            HealthAggregator::new(CheckerRegistry::new(), "boiler-api", "0.1.0"),
            UserService::new(Arc::new(PanickingRepo)),
        );
        let app = router(state);

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/users", r#"{"name":"Ada"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Still serving afterwards.
        let response = app.clone().oneshot(get_request("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(app.oneshot(get_request("/healthcheck")).await.unwrap()).await;
        assert_eq!(json["requestCount"], 2);
        assert_eq!(json["statuses"]["Internal Server Error"], 1);
        assert_eq!(json["statuses"]["OK"], 1);
    }

    #[tokio::test]
    async fn test_gzip_when_accepted() {
        let app = healthy_app().await;
        let request = HttpRequest::builder()
            .uri("/health")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        // gzip magic
        assert_eq!(bytes[..2], [0x1f_u8, 0x8b]);

        let plain = app.router.oneshot(get_request("/health")).await.unwrap();
        assert!(!plain.headers().contains_key(header::CONTENT_ENCODING));
    }
}
