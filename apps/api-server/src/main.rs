//! api-server: HTTP API for the user and task record service.
//!
//! Exposes user registration, lookup, replacement, partial update and delete,
//! plus the tasks owned by each user, over JSON. Supports local dev with:
//! - Storage: SQLite (file, default when the `sqlite` feature is on) or in-memory.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string).
//! - `.env` / `config/.env` files loaded into the environment at startup.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # volatile storage, JSON logs
//! STORAGE_PROVIDER=memory LOG_FORMAT=json cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod config;
mod repo;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::HeaderValue;
use domain::ids::UuidV4Generator;
use domain::service::{TaskService, UserService};
use domain::Clock;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repo::AnyRepo;

type Users = UserService<AnyRepo, UuidV4Generator, StdClock>;
type Tasks = TaskService<AnyRepo, AnyRepo, UuidV4Generator, StdClock>;

#[derive(Clone)]
struct AppState {
    users: Arc<Users>,
    tasks: Arc<Tasks>,
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

fn build_state(repo: AnyRepo) -> AppState {
    AppState {
        users: Arc::new(UserService::new(repo.clone(), UuidV4Generator, StdClock)),
        tasks: Arc::new(TaskService::new(
            repo.clone(),
            repo,
            UuidV4Generator,
            StdClock,
        )),
    }
}

#[tokio::main]
async fn main() {
    // Values already in the environment win over both files.
    dotenvy::dotenv().ok();
    dotenvy::from_filename("config/.env").ok();

    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_volatile();

    let repo = match build_repo(&cfg) {
        Ok(r) => r,
        Err(e) => {
            error!(err = %e, "failed to open storage");
            std::process::exit(1);
        }
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = routes::router(build_state(repo))
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
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

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
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, storage = ?cfg.storage_provider, "api-server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
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

// Construct a repository instance based on config and feature flags.
fn build_repo(cfg: &config::Config) -> Result<AnyRepo, domain::CoreError> {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => {
            info!(path = %cfg.db_path.display(), "opening sqlite store");
            AnyRepo::sqlite(&cfg.db_path)
        }
        _ => Ok(AnyRepo::memory()),
    }
}
