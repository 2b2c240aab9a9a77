use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{ExtractionError, ExtractionPipeline, TextRequest};

const ALLOWED_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";
const PREFLIGHT_MAX_AGE: &str = "600";
const INTERNAL_ERROR_DETAIL: &str = "Internal server error while processing the request.";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ExtractionPipeline>,
}

/// Origins allowed to call the API from a browser.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// An HTTP-facing failure: 400 with the error text, or 500 with a fixed message.
#[derive(Debug)]
pub struct ApiError(ExtractionError);

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection.body_text(), "request body rejected");
        ApiError(ExtractionError::InvalidInput(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_DETAIL.to_string())
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

pub fn router(pipeline: Arc<ExtractionPipeline>, cors: CorsPolicy) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/summarize", post(summarize))
        .route("/key-points", post(key_points))
        .with_state(AppState { pipeline })
        .layer(middleware::from_fn_with_state(Arc::new(cors), apply_cors))
        .layer(middleware::from_fn(log_http_request))
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Educational assistant backend is running. Welcome!".to_string(),
    })
}

async fn summarize(
    State(state): State<AppState>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let Json(request) = payload?;
    let result = state.pipeline.summarize(&request.text).await?;
    Ok(Json(result))
}

async fn key_points(
    State(state): State<AppState>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let Json(request) = payload?;
    let result = state.pipeline.key_points(&request.text).await?;
    Ok(Json(result))
}

async fn apply_cors(
    State(cors): State<Arc<CorsPolicy>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
        return next.run(req).await;
    };
    let allowed = origin.to_str().map(|o| cors.is_allowed(o)).unwrap_or(false);

    let is_preflight = req.method() == Method::OPTIONS
        && req.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    if is_preflight {
        if !allowed {
            return (StatusCode::BAD_REQUEST, "Disallowed CORS origin").into_response();
        }

        let requested_headers = req
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned();
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        if let Some(requested) = requested_headers {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested);
        }
        insert_origin_headers(headers, origin);
        return response;
    }

    let mut response = next.run(req).await;
    if allowed {
        insert_origin_headers(response.headers_mut(), origin);
    }
    response
}

fn insert_origin_headers(headers: &mut axum::http::HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let response = next.run(req).await;
    let status = response.status();
    info!(
        method = %method,
        uri = %uri,
        origin = %origin,
        status = %status,
        "http request"
    );
    response
}
