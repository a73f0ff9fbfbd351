//! Request Context Binder.
//!
//! Every request that reaches route dispatch carries a [`RequestContext`] in
//! its extensions: a handle to the [`EventPublisher`] plus the tenant the
//! caller was resolved to. Handlers take it as an extractor argument and
//! decide for themselves when to publish.
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::{routing::post, Json, Router};
//! use comanda_server::context::RequestContext;
//! use comanda_server::error::ApiResult;
//! use comanda_server::routes::AppState;
//! use serde_json::{json, Value};
//!
//! async fn close_table(ctx: RequestContext) -> ApiResult<Json<Value>> {
//!     // ... persist the change, then tell the restaurant's screens.
//!     let report = ctx.publish("table_closed", json!({"mesa": 4}))?;
//!     Ok(Json(json!({"notified": report.delivered})))
//! }
//!
//! let business: Router<AppState> = Router::new().route("/mesas/close", post(close_table));
//! ```

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use tracing::trace;

use crate::error::ApiError;
use crate::publisher::{EventPublisher, PublishReport};
use crate::routes::AppState;
use crate::types::TenantId;

/// Per-request publish capability and resolved tenant scope.
#[derive(Debug, Clone)]
pub struct RequestContext {
    publisher: EventPublisher,
    tenant: Option<TenantId>,
}

impl RequestContext {
    /// Creates a context carrying `publisher` and the caller's `tenant`.
    #[must_use]
    pub fn new(publisher: EventPublisher, tenant: Option<TenantId>) -> Self {
        Self { publisher, tenant }
    }

    /// The tenant the caller acts for, if one was resolved.
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// The tenant the caller acts for.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingTenant`] when no tenant was resolved.
    pub fn require_tenant(&self) -> Result<&TenantId, ApiError> {
        self.tenant.as_ref().ok_or(ApiError::MissingTenant)
    }

    /// The publisher, for handlers that address a tenant explicitly.
    #[must_use]
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Publishes to the caller's own tenant channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingTenant`] when no tenant was resolved.
    /// Delivery failures are reported in the [`PublishReport`], never as errors.
    pub fn publish(
        &self,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Result<PublishReport, ApiError> {
        let tenant = self.require_tenant()?;
        Ok(self.publisher.publish(tenant, event_type, payload))
    }
}

/// Middleware attaching a [`RequestContext`] to every request.
///
/// Never fails: a request whose tenant cannot be resolved still gets a
/// context, just without a tenant.
pub async fn bind_request_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let tenant = state.tenants.resolve(request.headers());
    trace!(
        path = %request.uri().path(),
        empresa_id = tenant.as_ref().map(TenantId::as_str),
        "Binding request context"
    );
    request
        .extensions_mut()
        .insert(RequestContext::new(state.publisher.clone(), tenant));
    next.run(request).await
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::internal("request context binder is not installed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::hub::Hub;

    fn publisher() -> EventPublisher {
        EventPublisher::new(Arc::new(Hub::new()))
    }

    #[test]
    fn require_tenant_without_tenant_fails() {
        let ctx = RequestContext::new(publisher(), None);
        assert_eq!(ctx.require_tenant(), Err(ApiError::MissingTenant));
        assert!(matches!(
            ctx.publish("order_created", Value::Null),
            Err(ApiError::MissingTenant)
        ));
    }

    #[test]
    fn publish_with_tenant_is_noop_on_empty_channel() {
        let tenant = TenantId::parse("42").unwrap();
        let ctx = RequestContext::new(publisher(), Some(tenant.clone()));
        assert_eq!(ctx.tenant(), Some(&tenant));
        let report = ctx.publish("order_created", Value::Null).unwrap();
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn extractor_rejects_when_binder_missing() {
        let (mut parts, ()) = axum::http::Request::new(()).into_parts();
        let result = RequestContext::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn extractor_reads_bound_context() {
        let (mut parts, ()) = axum::http::Request::new(()).into_parts();
        let tenant = TenantId::parse("7").unwrap();
        parts
            .extensions
            .insert(RequestContext::new(publisher(), Some(tenant.clone())));
        let ctx = RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(ctx.tenant(), Some(&tenant));
    }
}
