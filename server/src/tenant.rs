//! Tenant resolution for inbound HTTP requests.
//!
//! Authentication proper is an upstream concern. This module is the seam
//! where its result is read: a [`TenantResolver`] looks at request headers
//! and answers which company ("empresa") the caller acts for, if any.
//!
//! [`ConfiguredTenantResolver`] is the shipped implementation:
//!
//! 1. `Authorization: Bearer <token>` is compared in constant time against
//!    the configured `token -> empresa` table.
//! 2. If no token matches and the unsafe header mode is enabled, the
//!    `X-Empresa-Id` header is taken at face value.
//!
//! Tokens are never logged.

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use crate::config::Config;
use crate::types::TenantId;

/// Header carrying the caller's company id in unsafe development mode.
pub const HEADER_EMPRESA_ID: &str = "X-Empresa-Id";

/// Resolves the tenant a request acts for.
pub trait TenantResolver: Send + Sync {
    /// Returns the caller's tenant, or `None` if it cannot be established.
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantId>;
}

/// Token table and header policy taken from [`Config`].
#[derive(Clone)]
pub struct ConfiguredTenantResolver {
    tokens: Vec<(String, TenantId)>,
    trust_header: bool,
}

impl ConfiguredTenantResolver {
    /// Creates a resolver from explicit parts.
    #[must_use]
    pub fn new(tokens: impl IntoIterator<Item = (String, TenantId)>, trust_header: bool) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            trust_header,
        }
    }

    /// Creates a resolver from server configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .api_tokens
                .iter()
                .map(|(token, tenant)| (token.clone(), tenant.clone())),
            config.unsafe_trust_tenant_header,
        )
    }

    /// Looks `provided` up in the token table.
    ///
    /// Every entry is compared so the time taken does not depend on which
    /// entry (if any) matched.
    fn tenant_for_token(&self, provided: &str) -> Option<TenantId> {
        let mut found = None;
        for (token, tenant) in &self.tokens {
            if bool::from(token.as_bytes().ct_eq(provided.as_bytes())) {
                found = Some(tenant.clone());
            }
        }
        found
    }
}

impl std::fmt::Debug for ConfiguredTenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredTenantResolver")
            .field("tokens", &self.tokens.len())
            .field("trust_header", &self.trust_header)
            .finish()
    }
}

impl TenantResolver for ConfiguredTenantResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<TenantId> {
        if let Some(token) = bearer_token(headers) {
            if let Some(tenant) = self.tenant_for_token(token) {
                trace!(empresa_id = %tenant, "Tenant resolved from bearer token");
                return Some(tenant);
            }
            debug!("Bearer token did not match any configured tenant");
        }

        if self.trust_header {
            let raw = headers.get(HEADER_EMPRESA_ID)?.to_str().ok()?;
            match TenantId::parse(raw) {
                Ok(tenant) => {
                    trace!(empresa_id = %tenant, "Tenant taken from X-Empresa-Id header");
                    return Some(tenant);
                }
                Err(err) => debug!(error = %err, "Ignoring malformed X-Empresa-Id header"),
            }
        }

        None
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
