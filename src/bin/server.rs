use acoufp::config::Config;
use acoufp::engine::Engine;
use acoufp::error::EngineError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Thin HTTP boundary over the shared [`Engine`] (§6): `POST /resources`
/// stores a resource already present on disk at the server, `POST
/// /query` matches a clip against the index. Carried because the
/// teacher repo already depends on `axum` for exactly this kind of
/// ambient surface.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Config::from_env()?;
    let engine = Arc::new(Engine::from_config(config)?);

    let app = Router::new()
        .route("/resources", post(store_resource))
        .route("/query", post(query_resource))
        .with_state(engine);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    log::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StoreRequest {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct StoreResponse {
    resource_id: i32,
    num_fingerprints: i32,
    duration_seconds: f32,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    path: PathBuf,
    start: Option<f32>,
    len: Option<f32>,
    /// Caller's deadline for this query (§5, "Cancellation/timeouts"), in
    /// milliseconds from when the request is received.
    timeout_ms: Option<u64>,
}

async fn store_resource(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<StoreRequest>,
) -> Result<Json<Option<StoreResponse>>, ApiError> {
    let metadata = engine.store_path(&req.path).await?;
    Ok(Json(metadata.map(|m| StoreResponse {
        resource_id: m.id,
        num_fingerprints: m.num_fingerprints,
        duration_seconds: m.duration_seconds,
    })))
}

async fn query_resource(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Vec<acoufp::QueryResult>>, ApiError> {
    let deadline = req
        .timeout_ms
        .map(|ms| tokio::time::Instant::now() + std::time::Duration::from_millis(ms));
    let results = engine
        .query_window(&req.path, req.start, req.len, 0.0, &Default::default(), deadline)
        .await?;
    Ok(Json(results))
}

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}
