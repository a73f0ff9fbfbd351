//! HTTP route handlers for the Comanda server.
//!
//! This module provides the built-in endpoints:
//!
//! - `GET /` - Plain-text banner
//! - `GET /health` - Health check endpoint
//! - `GET /socket` - Realtime WebSocket endpoint
//! - `POST /api/v1/realtime/events` - Publish an event to the caller's company channel
//!
//! Business routers supplied by collaborators are mounted next to the
//! built-in `/api/v1` routes by [`crate::pipeline::create_router_with`].
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The realtime hub and the two handles over it (lifecycle manager, publisher)
//! - The tenant resolver used by the request context binder
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use comanda_server::config::Config;
//! use comanda_server::pipeline::create_router;
//! use comanda_server::routes::AppState;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::info;

use crate::body::Payload;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::hub::Hub;
use crate::publisher::EventPublisher;
use crate::realtime;
use crate::tenant::{ConfiguredTenantResolver, TenantResolver};
use crate::types::{TenantId, CONNECTED, JOINED_COMPANY_ROOM, JOIN_COMPANY_ROOM};

// ============================================================================
// Constants
// ============================================================================

/// Text served at `GET /`.
pub const BANNER: &str = "Restaurant platform API is online";

/// Longest event name accepted by the publish endpoint.
const MAX_EVENT_NAME_LEN: usize = 64;

/// Largest realtime frame accepted from a client (16 KB).
const MAX_SOCKET_MESSAGE_SIZE: usize = 16 * 1024;

/// Event names the realtime protocol uses itself.
const RESERVED_EVENT_NAMES: [&str; 3] = [CONNECTED, JOIN_COMPANY_ROOM, JOINED_COMPANY_ROOM];

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Every field is a cheap handle, so cloning the state per request only
/// bumps reference counts.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Owner of the channel registry and live connections.
    pub hub: Arc<Hub>,

    /// Connection Lifecycle Manager.
    pub connections: ConnectionManager,

    /// Event Publisher handed to every request through its context.
    pub publisher: EventPublisher,

    /// Resolves the caller's tenant from request headers.
    pub tenants: Arc<dyn TenantResolver>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates a new application state with the given configuration.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use comanda_server::routes::AppState;
    /// use comanda_server::config::Config;
    ///
    /// let config = Config::from_env().expect("failed to load config");
    /// let state = AppState::new(config);
    /// ```
    #[must_use]
    pub fn new(config: Config) -> Self {
        let tenants = Arc::new(ConfiguredTenantResolver::from_config(&config));
        Self::with_components(config, Arc::new(Hub::new()), tenants)
    }

    /// Creates application state with a custom hub and tenant resolver.
    ///
    /// Useful for testing or when tenants come from an external identity
    /// provider.
    #[must_use]
    pub fn with_components(
        config: Config,
        hub: Arc<Hub>,
        tenants: Arc<dyn TenantResolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connections: ConnectionManager::new(Arc::clone(&hub)),
            publisher: EventPublisher::new(Arc::clone(&hub)),
            hub,
            tenants,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("hub", &self.hub)
            .field("tenants", &"<TenantResolver>")
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Routers
// ============================================================================

/// Routes mounted at the root of the server.
pub(crate) fn root_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/socket", get(get_socket))
}

/// Built-in routes mounted under `/api/v1`.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new().route("/realtime/events", post(post_realtime_event))
}

// ============================================================================
// GET / - Banner
// ============================================================================

async fn get_root() -> &'static str {
    BANNER
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of open realtime connections.
    pub connections: usize,

    /// Number of company channels with at least one member.
    pub channels: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No tenant required.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "connections": 12,
///   "channels": 3,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.hub.connection_count(),
        channels: state.hub.channel_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// GET /socket - Realtime endpoint
// ============================================================================

/// GET /socket - Upgrade to a realtime connection.
///
/// The connection starts unbound. Clients send
/// `{"event":"join_company_room","data":<empresa_id>}` to start receiving
/// their company's events. See [`crate::realtime`] for the full protocol.
async fn get_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let connections = state.connections.clone();
    ws.max_message_size(MAX_SOCKET_MESSAGE_SIZE)
        .on_upgrade(move |socket| realtime::run_session(socket, connections))
}

// ============================================================================
// POST /api/v1/realtime/events - Publish
// ============================================================================

/// Request body for the publish endpoint.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Event name delivered to subscribers.
    pub event: String,

    /// Arbitrary event payload.
    #[serde(default)]
    pub data: Value,
}

impl PublishRequest {
    /// Checks the event name and returns it trimmed.
    fn event_name(&self) -> ApiResult<&str> {
        let name = self.event.trim();
        if name.is_empty() {
            return Err(ApiError::validation("event name cannot be empty"));
        }
        if name.chars().count() > MAX_EVENT_NAME_LEN {
            return Err(ApiError::validation(format!(
                "event name exceeds {MAX_EVENT_NAME_LEN} characters"
            )));
        }
        if RESERVED_EVENT_NAMES.contains(&name) {
            return Err(ApiError::validation(format!(
                "event name '{name}' is reserved"
            )));
        }
        Ok(name)
    }
}

/// Response body for the publish endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Event name as delivered.
    pub event: String,

    /// Channel the event was published to.
    pub empresa_id: TenantId,

    /// Channel members at publish time.
    pub recipients: usize,

    /// Members that could not be reached.
    pub failed: usize,
}

/// POST /api/v1/realtime/events - Publish to the caller's company channel.
///
/// The channel is always the caller's own tenant; a request cannot address
/// another company.
///
/// # Responses
///
/// - `202 Accepted` - Delivery attempted to every current member
/// - `400 Bad Request` - Undecodable body or invalid event name
/// - `401 Unauthorized` - No tenant resolved for the caller
/// - `415 Unsupported Media Type` - Body is neither JSON nor form-encoded
async fn post_realtime_event(
    ctx: RequestContext,
    body: Result<Payload<PublishRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let tenant = ctx.require_tenant()?.clone();
    let Payload(request) = body?;
    let event = request.event_name()?.to_string();

    let report = ctx
        .publisher()
        .publish(&tenant, event.clone(), request.data);

    info!(
        empresa_id = %tenant,
        event = %event,
        recipients = report.recipients,
        failed = report.failed,
        "Event published via HTTP"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            event,
            empresa_id: tenant,
            recipients: report.recipients,
            failed: report.failed,
        }),
    ))
}

// ============================================================================
// Tests
// ============================================================================
