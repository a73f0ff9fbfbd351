//! HTTP request pipeline.
//!
//! Stages, outermost first:
//!
//! 1. Request tracing
//! 2. Error stage: renders every failure into `{"error": ..., "code": ...}`
//! 3. Panic catcher (a panicking handler becomes a `500`, not a dropped socket)
//! 4. Origin guard: an untrusted `Origin` is rejected with `403`
//! 5. CORS headers and preflight
//! 6. Body size limit
//! 7. `/uploads` static files (read-only)
//! 8. Request Context Binder
//! 9. Route dispatch, with a `404` fallback
//!
//! Body decoding is done per handler by [`crate::body::Payload`], which runs
//! before the handler body and reports failures to the error stage.
//!
//! Stages never render error bodies themselves. They return an [`ApiError`],
//! whose response carries an [`ErrorReport`] marker, and the error stage
//! turns that marker into the JSON body. Framework responses that carry no
//! marker (a `405` from the method router, a `404` from the static file
//! service) are normalised into the same shape.

use std::any::Any;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::context::bind_request_context;
use crate::error::{ApiError, ErrorReport, ErrorResponse};
use crate::routes::{self, AppState};

/// Maximum request body size (100 KB).
pub const MAX_BODY_SIZE: usize = 100 * 1024;

/// Path prefix for business routes.
pub const API_PREFIX: &str = "/api/v1";

/// Path prefix for uploaded files.
pub const UPLOADS_PREFIX: &str = "/uploads";

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with the built-in routes only.
///
/// # Example
///
/// ```rust,no_run
/// use comanda_server::config::Config;
/// use comanda_server::pipeline::create_router;
/// use comanda_server::routes::AppState;
///
/// let config = Config::from_env().expect("failed to load config");
/// let router = create_router(AppState::new(config));
/// ```
pub fn create_router(state: AppState) -> Router {
    create_router_with(state, Router::new())
}

/// Creates the application router, mounting `business` under `/api/v1`.
///
/// Handlers in `business` can take a [`crate::context::RequestContext`]
/// argument to reach the publisher and the caller's tenant.
pub fn create_router_with(state: AppState, business: Router<AppState>) -> Router {
    let uploads = ServeDir::new(&state.config.uploads_dir);

    Router::new()
        .merge(routes::root_routes())
        .nest(API_PREFIX, routes::api_routes().merge(business))
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bind_request_context,
        ))
        .nest_service(UPLOADS_PREFIX, uploads)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors_layer(&state.config))
        .layer(middleware::from_fn_with_state(state.clone(), guard_origin))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::map_response(render_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Cross-origin policy
// ============================================================================

/// CORS policy for the configured frontend origins.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Rejects requests whose `Origin` header is not on the trusted list.
///
/// Requests without an `Origin` header (same-origin navigation, server to
/// server calls) pass through. This also covers the WebSocket upgrade.
async fn guard_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let trusted = origin
            .to_str()
            .is_ok_and(|origin| state.config.is_origin_allowed(origin));
        if !trusted {
            let origin = String::from_utf8_lossy(origin.as_bytes()).into_owned();
            warn!(
                origin = %origin,
                method = %request.method(),
                path = %request.uri().path(),
                "Rejected request from untrusted origin"
            );
            return ApiError::OriginNotAllowed(origin).into_response();
        }
    }
    next.run(request).await
}

// ============================================================================
// Fallbacks
// ============================================================================

async fn route_not_found(uri: Uri) -> ApiError {
    debug!(path = %uri.path(), "No route matched");
    ApiError::NotFound
}

/// Converts a caught panic into an error-marked `500`.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::internal(format!("panic: {detail}")).into_response()
}

// ============================================================================
// Error stage
// ============================================================================

/// Report for an error response produced without a marker.
fn unmarked_report(status: StatusCode) -> ErrorReport {
    let error = match status {
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::METHOD_NOT_ALLOWED => ApiError::MethodNotAllowed,
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
        StatusCode::UNSUPPORTED_MEDIA_TYPE => ApiError::UnsupportedMediaType,
        status if status.is_server_error() => {
            ApiError::internal(format!("upstream responded {status}"))
        }
        status => {
            return ErrorReport {
                status,
                code: "request_rejected",
                message: status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_lowercase(),
                detail: None,
            };
        }
    };
    let mut report = error.report();
    report.status = status;
    report
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Renders error-marked and unstructured error responses as JSON.
///
/// The marker is removed as it is rendered, so each error is rendered once.
/// Headers set by inner stages (CORS, `Allow`) are kept.
async fn render_errors(mut response: Response) -> Response {
    let report = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => report,
        None => {
            let status = response.status();
            if !(status.is_client_error() || status.is_server_error()) || is_json(&response) {
                return response;
            }
            unmarked_report(status)
        }
    };

    if report.status.is_server_error() {
        error!(
            status = report.status.as_u16(),
            code = report.code,
            detail = report.detail.as_deref().unwrap_or_default(),
            "Request failed"
        );
    } else {
        debug!(
            status = report.status.as_u16(),
            code = report.code,
            message = %report.message,
            "Request rejected"
        );
    }

    let (mut parts, _) = response.into_parts();
    let (rendered, body) = Json(ErrorResponse::from(&report)).into_response().into_parts();
    parts.status = report.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.extend(rendered.headers);
    Response::from_parts(parts, body)
}

// ============================================================================
// Tests
// ============================================================================
