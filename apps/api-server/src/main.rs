//! api-server — HTTP API for the async completion demo workspace.
//!
//! Serves the async resources (bounded and unbounded completion on the
//! managed executor), to-do and person records, multipart uploads, and
//! three security pages.
//! - Auth: OIDC bearer token verification, or disabled (debug) mode via X-Debug-User.
//! - Storage: In-memory or SQLite (file) when the `sqlite` feature is enabled.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string).
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # OIDC mode, client settings from a properties file
//! AUTH_PROVIDER=oidc OIDC_PROPERTIES=./oidc.properties cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod auth;
mod config;
mod notifications;
mod pages;
mod repo;
mod resources;
mod uploads;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::{
    routing::{get, post, put},
    Router,
};
use concurrency::{EventDispatcher, ManagedExecutor};
use domain::security::StaticIdentityStore;
use domain::service::{PersonService, TodoService};
use domain::{Clock, CoreError, IdGenerator};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::auth::Authenticator;
use crate::notifications::{NotificationSender, TodoCompletedHandler};
use crate::repo::AnyRepo;
use crate::uploads::UploadStore;

type Todos = TodoService<AnyRepo, UuidIds, StdClock>;
type Persons = PersonService<AnyRepo, UuidIds, StdClock>;

#[derive(Clone)]
struct AppState {
    todos: Arc<Todos>,
    persons: Arc<Persons>,
    executor: ManagedExecutor,
    notifications: NotificationSender,
    auth: Arc<Authenticator>,
    uploads: UploadStore,
    async_timeout: Duration,
    work_delay: Duration,
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}

#[derive(Clone)]
struct UuidIds;
impl IdGenerator for UuidIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl AppState {
    fn new(
        cfg: &config::Config,
        repo: AnyRepo,
        executor: ManagedExecutor,
        auth: Authenticator,
    ) -> Self {
        let dispatcher = EventDispatcher::new(executor.clone())
            .observe(TodoCompletedHandler)
            .mode(cfg.notification_mode)
            .notification_timeout(cfg.notification_timeout);
        Self {
            todos: Arc::new(TodoService::new(repo.clone(), UuidIds, StdClock)),
            persons: Arc::new(PersonService::new(repo, UuidIds, StdClock)),
            notifications: NotificationSender::new(dispatcher, executor.clone()),
            executor,
            auth: Arc::new(auth),
            uploads: UploadStore::new(cfg.upload_dir.clone()),
            async_timeout: cfg.async_timeout,
            work_delay: cfg.async_work_delay,
        }
    }

    /// Insert the sample records unless the store already holds data.
    fn seed_if_empty(&self) -> Result<(), CoreError> {
        if self.todos.find_all()?.is_empty() {
            let seeded = self.todos.seed()?;
            info!(count = seeded.len(), "seeded todos");
        }
        if self.persons.find_all()?.is_empty() {
            let seeded = self.persons.seed()?;
            info!(count = seeded.len(), "seeded persons");
        }
        Ok(())
    }
}

fn build_authenticator(cfg: &config::Config) -> Result<Authenticator, oidc_auth::AuthError> {
    let identities = Arc::new(StaticIdentityStore::demo());
    match (&cfg.auth_provider, &cfg.oidc) {
        (config::AuthProvider::Oidc, Some(oidc)) => {
            let mut settings =
                oidc_auth::OidcSettings::new(oidc.issuer_uri.clone(), oidc.client_id.clone());
            settings.insecure_skip_signature = cfg.insecure_skip_signature;
            info!(
                issuer = %settings.issuer_uri,
                domain = oidc.domain.as_deref().unwrap_or("-"),
                "oidc auth enabled"
            );
            Ok(Authenticator::Oidc {
                verifier: oidc_auth::OidcVerifier::new(settings)?,
                identities,
            })
        }
        _ => Ok(Authenticator::Debug { identities }),
    }
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/async", get(resources::async_resource))
        .route("/api/ejb", get(resources::ejb_resource))
        .route(
            "/api/concurrencyAsync",
            get(resources::concurrency_async_resource),
        )
        .route(
            "/api/todos",
            get(resources::list_todos).post(resources::create_todo),
        )
        .route("/api/todos/async", post(resources::create_todo_async))
        .route(
            "/api/todos/getAllTodosAsync",
            get(resources::list_todos_async),
        )
        .route(
            "/api/todos/getAllTodosEjbFuture",
            get(resources::list_todos_ejb_future),
        )
        .route(
            "/api/todos/getAllTodosAndAsync",
            get(resources::list_todos_and_async),
        )
        .route(
            "/api/todos/getAllTodosAndConcurrencyAsync",
            get(resources::list_todos_and_concurrency_async),
        )
        .route("/api/todos/:id", get(resources::get_todo))
        .route(
            "/api/todos/:id/completed",
            put(resources::mark_todo_completed),
        )
        .route("/api/persons", get(resources::list_persons))
        .route("/api/persons/:id", get(resources::get_person))
        .route("/api/greeting", get(resources::greeting))
        .route("/api/multiparts", get(uploads::list_uploads))
        .route("/api/multiparts/simple", post(uploads::upload_simple))
        .route("/api/multiparts/list", post(uploads::upload_list))
        .route("/unsecured", get(pages::unsecured))
        .route("/protected", get(pages::protected))
        .route("/username", get(pages::username))
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let auth = match build_authenticator(&cfg) {
        Ok(a) => a,
        Err(e) => {
            error!(err = %e, "auth setup failed");
            std::process::exit(1);
        }
    };
    let executor = match ManagedExecutor::new(cfg.max_async) {
        Ok(x) => x,
        Err(e) => {
            error!(err = %e, "executor setup failed");
            std::process::exit(1);
        }
    };

    let repo = repo::build_repo(&cfg);
    let state = AppState::new(&cfg, repo, executor.clone(), auth);
    let upload_dir = state.uploads.dir().to_path_buf();
    if cfg.seed_samples {
        if let Err(e) = state.seed_if_empty() {
            error!(err = %e, "seeding sample data failed");
        }
    }

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = routes()
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state);

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin.clone()]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-debug-user"),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "bind failed");
            std::process::exit(1);
        }
    };
    info!(
        %addr,
        max_async = cfg.max_async,
        upload_dir = %upload_dir.display(),
        "api-server listening"
    );
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(err = %e, "server error");
    }
    executor.shutdown();
    info!("api-server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(err = %e, "failed to listen for ctrl-c");
    }
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_config(work_delay_ms: u64, timeout_ms: u64) -> config::Config {
        config::Config {
            port: 0,
            auth_provider: config::AuthProvider::None,
            oidc: None,
            insecure_skip_signature: false,
            cors_allow_origin: HeaderValue::from_static("*"),
            storage_provider: config::StorageProvider::Memory,
            db_path: "unused.db".into(),
            upload_dir: std::env::temp_dir().join("api-server-test-uploads"),
            log_format: config::LogFormat::Pretty,
            max_async: 5,
            async_timeout: Duration::from_millis(timeout_ms),
            async_work_delay: Duration::from_millis(work_delay_ms),
            notification_timeout: Duration::from_millis(1000),
            notification_mode: concurrency::NotificationMode::Serial,
            seed_samples: true,
        }
    }

    fn state_on(cfg: &config::Config, executor: ManagedExecutor) -> AppState {
        let auth = build_authenticator(cfg).unwrap();
        let state = AppState::new(cfg, AnyRepo::memory(), executor, auth);
        state.seed_if_empty().unwrap();
        state
    }

    fn state_with(work_delay_ms: u64, timeout_ms: u64) -> AppState {
        let cfg = test_config(work_delay_ms, timeout_ms);
        state_on(&cfg, ManagedExecutor::new(cfg.max_async).unwrap())
    }

    fn app_with(state: AppState) -> Router {
        routes().with_state(state)
    }

    fn app() -> Router {
        app_with(state_with(10, 1000))
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        serde_json::from_str(&body_string(resp).await).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_todo_flow() {
        let router = app();

        let resp = router
            .clone()
            .oneshot(json_req("POST", "/api/todos", "{\"title\":\"  Ship it  \"}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let location = resp
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let created = body_json(resp).await;
        assert_eq!(location, format!("/api/todos/{}", created["id"].as_str().unwrap()));
        assert_eq!(created["title"], "Ship it");
        assert_eq!(created["completed"], false);

        let resp = router.clone().oneshot(get_req(&location)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, created);

        let resp = router.oneshot(get_req("/api/todos")).await.unwrap();
        let all = body_json(resp).await;
        assert_eq!(all.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn todo_errors_map_to_status_codes() {
        let router = app();

        let resp = router
            .clone()
            .oneshot(get_req("/api/todos/no-such-id"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "not_found");

        let resp = router
            .clone()
            .oneshot(get_req("/api/todos/bad%20id"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router
            .oneshot(json_req("POST", "/api/todos", "{\"title\":\"   \"}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_resource_within_bound() {
        let router = app_with(state_with(50, 1000));
        let resp = router.oneshot(get_req("/api/async")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "asynchronous resource");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_resource_past_bound_is_503() {
        let router = app_with(state_with(400, 50));
        let resp = router.oneshot(get_req("/api/async")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(resp).await["error"]["message"],
            http_common::TIMEOUT_MESSAGE
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unbounded_async_resources_answer() {
        let router = app();
        let resp = router.clone().oneshot(get_req("/api/ejb")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Asynchronus EJB resource");

        let resp = router
            .oneshot(get_req("/api/concurrencyAsync"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Concurrency Async resource");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_todo_endpoints() {
        let router = app();

        let resp = router
            .clone()
            .oneshot(get_req("/api/todos/getAllTodosAsync"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let titles: Vec<String> = body_json(resp)
            .await
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, domain::service::SAMPLE_TODO_TITLES.to_vec());

        let resp = router
            .oneshot(json_req("POST", "/api/todos/async", "{\"title\":\"async one\"}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.headers().get(header::LOCATION).is_some());
    }

    #[tokio::test]
    async fn location_follows_host_header() {
        let router = app();
        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/todos")
                    .header("content-type", "application/json")
                    .header(header::HOST, "example.test:8080")
                    .header("x-forwarded-proto", "https")
                    .body(Body::from("{\"title\":\"absolute\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
        let created = body_json(resp).await;
        assert_eq!(
            location,
            format!(
                "https://example.test:8080/api/todos/{}",
                created["id"].as_str().unwrap()
            )
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_json_gets_error_envelope() {
        let router = app();
        let resp = router
            .clone()
            .oneshot(json_req("POST", "/api/todos", "{\"title\": "))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(!body["error"]["message"].as_str().unwrap().is_empty());

        let resp = router
            .clone()
            .oneshot(json_req("POST", "/api/todos/async", "{\"completed\":true}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");

        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/todos")
                    .body(Body::from("{\"title\":\"no content type\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn composed_todo_listings_return_samples() {
        let router = app();
        for uri in [
            "/api/todos/getAllTodosEjbFuture",
            "/api/todos/getAllTodosAndAsync",
            "/api/todos/getAllTodosAndConcurrencyAsync",
        ] {
            let resp = router.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            let titles: Vec<String> = body_json(resp)
                .await
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["title"].as_str().unwrap().to_string())
                .collect();
            assert_eq!(titles, domain::service::SAMPLE_TODO_TITLES.to_vec(), "{uri}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn saturated_executor_times_out_todo_endpoints() {
        let mut cfg = test_config(10, 50);
        cfg.max_async = 1;
        let executor = ManagedExecutor::new(1).unwrap();
        let state = state_on(&cfg, executor.clone());
        let router = app_with(state);

        let blocker = executor.submit(|| std::thread::sleep(Duration::from_millis(600)));
        for _ in 0..50 {
            if executor.available() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.available(), 0);

        let resp = router
            .clone()
            .oneshot(get_req("/api/todos/getAllTodosAsync"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(resp).await["error"]["message"],
            http_common::TIMEOUT_MESSAGE
        );

        let resp = router
            .oneshot(json_req("POST", "/api/todos/async", "{\"title\":\"late\"}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "service_unavailable");
        assert_eq!(body["error"]["message"], http_common::TIMEOUT_MESSAGE);

        blocker.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shut_down_executor_is_a_server_error() {
        let state = state_with(10, 1000);
        state.executor.shutdown();
        let router = app_with(state);

        let resp = router
            .clone()
            .oneshot(get_req("/api/todos/getAllTodosAsync"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "internal");
        assert_ne!(body["error"]["message"], http_common::TIMEOUT_MESSAGE);

        let resp = router
            .oneshot(json_req("POST", "/api/todos/async", "{\"title\":\"never\"}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["error"]["code"], "internal");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completing_a_todo_fires_notification() {
        let state = state_with(10, 1000);
        let router = app_with(state.clone());
        let id = state.todos.find_all().unwrap()[0].id.to_string();

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/todos/{id}/completed"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = router
            .clone()
            .oneshot(get_req(&format!("/api/todos/{id}")))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["completed"], true);

        for _ in 0..50 {
            if state.notifications.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.notifications.sent_count(), 1);

        let resp = router
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/todos/missing/completed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn persons_and_greeting() {
        let router = app();

        let resp = router.clone().oneshot(get_req("/api/persons")).await.unwrap();
        let persons = body_json(resp).await;
        let persons = persons.as_array().unwrap();
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0]["name"], "Jack");
        assert_eq!(persons[0]["gender"], "MALE");
        assert_eq!(persons[0]["yearsWorked"], 2);
        assert_eq!(persons[0]["salary"], "1234.5678");
        assert_eq!(persons[0]["hourlyRate"], "33.33");

        let id = persons[1]["id"].as_str().unwrap();
        let resp = router
            .clone()
            .oneshot(get_req(&format!("/api/persons/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["name"], "Rose");

        let resp = router
            .clone()
            .oneshot(get_req("/api/persons/nobody"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = router.oneshot(get_req("/api/greeting")).await.unwrap();
        let greeting = body_json(resp).await;
        assert_eq!(greeting["name"], "Hantsy");
        assert!(http_common::parse_rfc3339(greeting["sentAt"].as_str().unwrap()).is_ok());
    }

    const BOUNDARY: &str = "demo-boundary-7MA4YWxkTrZu0gW";

    // (field name, file name, content type, content)
    fn multipart_req(uri: &str, parts: &[(&str, Option<&str>, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, content_type, content) in parts {
            body.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n"
                )),
            }
            if let Some(ct) = content_type {
                body.push_str(&format!("Content-Type: {ct}\r\n"));
            }
            body.push_str(&format!("\r\n{content}\r\n"));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn multipart_uploads_are_stored_and_listed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(10, 1000);
        cfg.upload_dir = dir.path().join("uploads");
        let router = app_with(state_on(&cfg, ManagedExecutor::new(cfg.max_async).unwrap()));

        let resp = router
            .clone()
            .oneshot(get_req("/api/multiparts"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let listing = body_string(resp).await;
        assert!(listing.contains("name=\"abd\"; filename=\"abc.text\""));
        assert!(listing.contains("this is a text content"));

        let resp = router
            .clone()
            .oneshot(multipart_req(
                "/api/multiparts/simple",
                &[
                    ("name", None, None, "Hantsy"),
                    ("part", Some("hello.txt"), Some("text/plain"), "hello upload"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .clone()
            .oneshot(multipart_req(
                "/api/multiparts/list",
                &[
                    ("first", Some("b.svg"), Some("application/svg+xml"), "<svg/>"),
                    ("second", None, Some("text/plain"), "anonymous"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored: Vec<String> = std::fs::read_dir(&cfg.upload_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().any(|n| n == "hello.txt"));
        assert!(stored.iter().any(|n| n != "hello.txt" && n.ends_with(".txt")));

        let resp = router.oneshot(get_req("/api/multiparts")).await.unwrap();
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
        let listing = body_string(resp).await;
        assert!(listing.starts_with("--"));
        assert!(listing.contains("filename=\"hello.txt\"\r\nContent-Type: text/plain\r\n\r\nhello upload"));
        assert!(listing.contains("filename=\"b.svg\"\r\nContent-Type: application/svg+xml"));
        assert!(listing.contains("anonymous"));
    }

    #[tokio::test]
    async fn malformed_uploads_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(10, 1000);
        cfg.upload_dir = dir.path().to_path_buf();
        let router = app_with(state_on(&cfg, ManagedExecutor::new(cfg.max_async).unwrap()));

        let resp = router
            .clone()
            .oneshot(multipart_req(
                "/api/multiparts/simple",
                &[("name", None, None, "no file")],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");

        let resp = router
            .oneshot(json_req("POST", "/api/multiparts/list", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "bad_request");
    }

    fn as_user(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(auth::DEBUG_USER_HEADER, user)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn security_pages_enforce_roles() {
        let router = app();

        let resp = router.clone().oneshot(get_req("/unsecured")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("Unsecured Servlet"));

        let resp = router.clone().oneshot(get_req("/protected")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router
            .clone()
            .oneshot(as_user("/protected", "user"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("<p>subject:user</p>"));

        let resp = router
            .clone()
            .oneshot(as_user("/protected", "mallory"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = router
            .clone()
            .oneshot(as_user("/username", "user@example.com"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "user@example.com");

        let resp = router
            .oneshot(as_user("/username", "mallory"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
