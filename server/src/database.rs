//! Startup database connectivity check.
//!
//! The database belongs to the business routes, not to the realtime core.
//! The server only checks once, after the listener is bound, that the
//! configured database endpoint accepts TCP connections, and logs the
//! result. A failed check never stops the server.

use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info};

use crate::config::{Config, DatabaseTarget};

/// How long the startup check waits for a connection (5 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint accepted a TCP connection.
    Reachable { address: String, elapsed: Duration },
    /// No database endpoint is configured.
    Skipped,
}

/// One-shot reachability check against the configured database.
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    target: Option<DatabaseTarget>,
    timeout: Duration,
}

impl DatabaseProbe {
    #[must_use]
    pub fn new(target: Option<DatabaseTarget>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.database.clone(), DEFAULT_PROBE_TIMEOUT)
    }

    /// Opens and immediately drops one TCP connection to the target.
    ///
    /// # Errors
    ///
    /// Fails if the connection is refused, the host does not resolve, or the
    /// attempt takes longer than the probe timeout.
    pub async fn check(&self) -> anyhow::Result<ProbeOutcome> {
        let Some(target) = &self.target else {
            return Ok(ProbeOutcome::Skipped);
        };

        let address = format!("{}:{}", target.host, target.port);
        let started = Instant::now();
        timeout(self.timeout, TcpStream::connect(&address))
            .await
            .with_context(|| format!("timed out after {:?} connecting to {address}", self.timeout))?
            .with_context(|| format!("could not connect to {address}"))?;

        Ok(ProbeOutcome::Reachable {
            address,
            elapsed: started.elapsed(),
        })
    }

    /// Runs [`check`](Self::check) in the background and logs the outcome.
    pub fn spawn_startup_check(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.check().await {
                Ok(ProbeOutcome::Reachable { address, elapsed }) => info!(
                    address = %address,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Database connection established"
                ),
                Ok(ProbeOutcome::Skipped) => {
                    info!("DB_HOST not set, skipping database connectivity check");
                }
                Err(err) => error!(error = %format!("{err:#}"), "Database connectivity check failed"),
            }
        })
    }
}
