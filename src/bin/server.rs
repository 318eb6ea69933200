use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use cut_planner::{
    EngineConfig, ErrorResponse, OptimizeError, OptimizeRequest, OptimizeResponse, Solver,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(err: &OptimizeError) -> StatusCode {
    if err.is_input_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, OptimizeError::Solver(_)) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

fn api_error(err: OptimizeError) -> ApiError {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "optimization failed");
        sentry::capture_error(&err);
    } else {
        tracing::info!(error_type = err.code(), error = %err, "request rejected");
    }
    (status, Json(ErrorResponse::from(&err)))
}

async fn optimize(
    State(solver): State<Arc<Solver>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    tracing::info!(
        body = serde_json::to_string(&req).unwrap_or_default(),
        "POST /optimize"
    );

    let plan = tokio::task::spawn_blocking(move || solver.solve(&req))
        .await
        .map_err(|e| api_error(OptimizeError::Solver(format!("planning task failed: {e}"))))?
        .map_err(api_error)?;

    Ok(Json(OptimizeResponse::from(plan)))
}

fn load_config() -> EngineConfig {
    let mut config = match std::env::var("CUT_PLANNER_CONFIG") {
        Ok(path) => EngineConfig::from_file(std::path::Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }),
        Err(_) => EngineConfig::default(),
    };
    if let Ok(dir) = std::env::var("CUT_PLANNER_CACHE_DIR") {
        config = config.with_cache_dir(dir);
    }
    config
}

#[tokio::main]
async fn main() {
    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let log_path =
        std::env::var("CUT_PLANNER_LOG").unwrap_or_else(|_| "development.log".to_string());
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .unwrap_or_else(|e| panic!("failed to open {log_path}: {e}"));

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .init();

    let solver = Solver::new(load_config()).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");

    let app = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/optimize", post(optimize))
        .with_state(Arc::new(solver))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    eprintln!("Listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}
