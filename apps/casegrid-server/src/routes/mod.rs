mod cases;
mod grid;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::websocket::websocket_handler;
use crate::AppState;

pub use cases::*;
pub use grid::*;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/cases", get(list_cases).post(create_case))
        .route(
            "/api/cases/:id",
            get(get_case).put(update_case).delete(delete_case),
        )
        .route(
            "/api/cases/:id/grid",
            get(load_grid).post(save_grid).put(save_grid),
        )
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Payload validation failures, reported as `{errors: [...]}`.
    BadRequest(Vec<String>),
    /// A single unusable request parameter.
    Rejected(&'static str),
    NotFound,
    Internal(&'static str),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Debug, Serialize)]
struct ErrorsBody {
    errors: Vec<String>,
}

/// Unreadable bodies are reported like any other invalid payload.
fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        debug!(error = %rejection, "unreadable request body");
        ApiError::BadRequest(vec!["Request body must be a JSON object.".to_string()])
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(errors) => {
                (StatusCode::BAD_REQUEST, Json(ErrorsBody { errors })).into_response()
            }
            ApiError::Rejected(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error })).into_response()
            }
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody { error: "Not found." }),
            )
                .into_response(),
            ApiError::Internal(error) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error })).into_response()
            }
        }
    }
}
