//! Server configuration module.
//!
//! Parses configuration from environment variables for the Comanda server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FRONTEND_URL` | Yes | - | Trusted frontend origin(s), comma separated |
//! | `COMANDA_API_TOKENS` | Yes* | - | Format: `token1:empresa1,token2:empresa2` |
//! | `PORT` | No | 3001 | HTTP server port |
//! | `UPLOADS_DIR` | No | `public/uploads` | Directory served under `/uploads` |
//! | `DB_HOST` | No | - | Database host probed once at startup |
//! | `DB_PORT` | No | 3306 | Database port probed once at startup |
//! | `COMANDA_UNSAFE_TRUST_TENANT_HEADER` | No | false | Trust `X-Empresa-Id` (dev only) |
//!
//! *Not required if `COMANDA_UNSAFE_TRUST_TENANT_HEADER=true`

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use axum::http::HeaderValue;
use thiserror::Error;
use tracing::warn;

use crate::types::TenantId;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3001;

/// Default database port used by the startup probe.
const DEFAULT_DB_PORT: u16 = 3306;

/// Default directory for uploaded files.
const DEFAULT_UPLOADS_DIR: &str = "public/uploads";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Database endpoint checked for reachability at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Origins allowed to call the API and open realtime connections.
    pub allowed_origins: Vec<String>,

    /// Map of bearer token to the tenant it authenticates.
    pub api_tokens: HashMap<String, TenantId>,

    /// When true, the `X-Empresa-Id` header is trusted as the caller's tenant
    /// (development only).
    pub unsafe_trust_tenant_header: bool,

    /// Directory served read-only under `/uploads`.
    pub uploads_dir: PathBuf,

    /// Database endpoint for the startup connectivity check, if configured.
    pub database: Option<DatabaseTarget>,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `FRONTEND_URL` is missing or holds an invalid origin
    /// - `COMANDA_API_TOKENS` is missing (unless the unsafe header mode is on)
    ///   or malformed
    /// - `PORT` or `DB_PORT` is not a valid u16
    ///
    /// # Example
    ///
    /// ```no_run
    /// use comanda_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_trust_tenant_header = parse_bool_env("COMANDA_UNSAFE_TRUST_TENANT_HEADER");
        let port = parse_port()?;
        let allowed_origins = parse_origins()?;
        let api_tokens = parse_api_tokens()?;
        let uploads_dir = env::var("UPLOADS_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR), PathBuf::from);
        let database = parse_database()?;

        let config = Self {
            port,
            allowed_origins,
            api_tokens,
            unsafe_trust_tenant_header,
            uploads_dir,
            database,
        };

        config.validate()?;

        if config.unsafe_trust_tenant_header {
            warn!(
                "COMANDA_UNSAFE_TRUST_TENANT_HEADER is enabled - the X-Empresa-Id header \
                 is trusted without authentication. Do not use in production!"
            );
        }

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Requires at least one trusted origin, and at least one API token unless
    /// the unsafe header mode is enabled.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_origins.is_empty() {
            return Err(ConfigError::ValidationError(
                "FRONTEND_URL lists no origins".to_string(),
            ));
        }

        if self.unsafe_trust_tenant_header {
            return Ok(());
        }

        if self.api_tokens.is_empty() {
            return Err(ConfigError::MissingEnvVar(
                "COMANDA_API_TOKENS".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns `true` if `origin` is on the trusted list.
    #[must_use]
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the FRONTEND_URL environment variable.
///
/// Expected format: `https://app.example.com` or a comma-separated list.
/// Trailing slashes are dropped, since browsers never send them in `Origin`.
fn parse_origins() -> Result<Vec<String>, ConfigError> {
    let raw = match env::var("FRONTEND_URL") {
        Ok(s) if !s.trim().is_empty() => s,
        _ => return Err(ConfigError::MissingEnvVar("FRONTEND_URL".to_string())),
    };

    let mut origins = Vec::new();

    for origin in raw.split(',') {
        let origin = origin.trim().trim_end_matches('/');
        if origin.is_empty() {
            continue;
        }

        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(ConfigError::InvalidFormat {
                var: "FRONTEND_URL".to_string(),
                message: format!("origin '{}' must start with http:// or https://", origin),
            });
        }

        if HeaderValue::from_str(origin).is_err() {
            return Err(ConfigError::InvalidFormat {
                var: "FRONTEND_URL".to_string(),
                message: format!("origin '{}' is not a valid header value", origin),
            });
        }

        origins.push(origin.to_string());
    }

    Ok(origins)
}

/// Parse the COMANDA_API_TOKENS environment variable.
///
/// Expected format: `token1:empresa1,token2:empresa2`.
fn parse_api_tokens() -> Result<HashMap<String, TenantId>, ConfigError> {
    let tokens_str = match env::var("COMANDA_API_TOKENS") {
        Ok(s) if !s.is_empty() => s,
        _ => return Ok(HashMap::new()),
    };

    let mut tokens = HashMap::new();

    for pair in tokens_str.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let Some((token, tenant)) = pair.rsplit_once(':') else {
            return Err(ConfigError::InvalidFormat {
                var: "COMANDA_API_TOKENS".to_string(),
                message: "expected 'token:empresa_id' format".to_string(),
            });
        };

        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::InvalidFormat {
                var: "COMANDA_API_TOKENS".to_string(),
                message: "token cannot be empty".to_string(),
            });
        }

        let tenant = TenantId::parse(tenant).map_err(|err| ConfigError::InvalidFormat {
            var: "COMANDA_API_TOKENS".to_string(),
            message: format!("invalid empresa id: {err}"),
        })?;

        tokens.insert(token.to_string(), tenant);
    }

    Ok(tokens)
}

/// Parse DB_HOST and DB_PORT.
///
/// Returns `None` when no host is configured; the startup probe is then
/// skipped.
fn parse_database() -> Result<Option<DatabaseTarget>, ConfigError> {
    let host = match env::var("DB_HOST") {
        Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
        _ => return Ok(None),
    };

    let port = match env::var("DB_PORT") {
        Ok(port) => port.trim().parse().map_err(|_| ConfigError::InvalidFormat {
            var: "DB_PORT".to_string(),
            message: format!("'{}' is not a valid port", port),
        })?,
        Err(_) => DEFAULT_DB_PORT,
    };

    Ok(Some(DatabaseTarget { host, port }))
}
