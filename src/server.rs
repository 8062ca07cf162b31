//! HTTP API over [`MemoryService`]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::MemdcError;
use crate::service::MemoryService;
use crate::types::{CreateMemoryInput, SearchQuery, DEFAULT_K};
use crate::warehouse::DEFAULT_SEARCH_LIMIT;

/// Error response: `{"detail": "<message>"}` with the error's status code
pub struct ApiError(MemdcError);

impl From<MemdcError> for ApiError {
    fn from(e: MemdcError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(MemdcError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(MemdcError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
    k: Option<usize>,
    #[serde(rename = "type")]
    memory_type: Option<String>,
    status: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WarehouseSearchParams {
    #[serde(default)]
    query: String,
    user_id: Option<String>,
    limit: Option<usize>,
}

/// HTTP server for the memory API
pub struct MemoryServer {
    service: Arc<MemoryService>,
    addr: SocketAddr,
}

impl MemoryServer {
    pub fn new(service: Arc<MemoryService>, addr: SocketAddr) -> Self {
        Self { service, addr }
    }

    /// Build the router
    pub fn router(service: Arc<MemoryService>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/memories:create", axum::routing::post(create_handler))
            .route("/memories:search", get(search_handler))
            .route("/memories:search-dc", get(search_dc_handler))
            .route(
                "/memories/{id}",
                get(get_handler).delete(delete_handler),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(service)
    }

    /// Serve until the process is stopped
    pub async fn start(self) -> std::io::Result<()> {
        let app = Self::router(self.service);

        tracing::info!("Memory API listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health_handler(State(service): State<Arc<MemoryService>>) -> impl IntoResponse {
    Json(service.health().await)
}

async fn create_handler(
    State(service): State<Arc<MemoryService>>,
    body: std::result::Result<Json<CreateMemoryInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(input) = body?;
    let outcome = service.create(input).await?;
    Ok(Json(outcome))
}

async fn search_handler(
    State(service): State<Arc<MemoryService>>,
    params: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let query = SearchQuery {
        query: params.query,
        k: params.k.unwrap_or(DEFAULT_K),
        memory_type: params.memory_type,
        status: params.status,
        user_id: params.user_id,
    };
    Ok(Json(service.search(query).await?))
}

async fn search_dc_handler(
    State(service): State<Arc<MemoryService>>,
    params: std::result::Result<Query<WarehouseSearchParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let hits = service
        .search_warehouse(
            &params.query,
            params.user_id.as_deref(),
            params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await?;
    Ok(Json(hits))
}

async fn get_handler(
    State(service): State<Arc<MemoryService>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    match service.get_by_id(&id).await? {
        Some(memory) => Ok(Json(memory).into_response()),
        None => Err(MemdcError::NotFound(id).into()),
    }
}

async fn delete_handler(
    State(service): State<Arc<MemoryService>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let response = if service.delete_by_id(&id).await? {
        (
            StatusCode::OK,
            Json(json!({
                "message": format!("Memory {} deleted", id),
                "deleted": true,
            })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": format!("Memory {} not found", id),
                "deleted": false,
            })),
        )
    };
    Ok(response.into_response())
}
