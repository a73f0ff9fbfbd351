//! Shared owner of realtime state.
//!
//! The channel registry and the table of live connections are the only shared
//! mutable state in the server. Both live inside one [`Hub`] behind a single
//! mutex, so every bind, unbind and membership snapshot is atomic with respect
//! to the others. The lock is never held across an `.await`.
//!
//! Handles that mutate or read this state ([`crate::connection::ConnectionManager`]
//! and [`crate::publisher::EventPublisher`]) hold an `Arc<Hub>` and are cheap
//! to clone into request handlers and socket tasks.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::Connection;
use crate::registry::ChannelRegistry;
use crate::types::{ConnectionId, TenantId};

/// Registry and connection table guarded together.
#[derive(Debug, Default)]
pub(crate) struct HubState {
    pub(crate) registry: ChannelRegistry,
    pub(crate) connections: HashMap<ConnectionId, Connection>,
}

/// Lock-protected realtime state shared by the lifecycle manager and publisher.
#[derive(Debug, Default)]
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the hub state.
    ///
    /// A panic while holding the lock cannot leave the registry half-updated
    /// (every mutation is a single map operation pair), so a poisoned lock is
    /// recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the connections currently bound to `tenant`.
    #[must_use]
    pub fn members_of(&self, tenant: &TenantId) -> HashSet<ConnectionId> {
        self.lock().registry.members_of(tenant)
    }

    /// Returns the tenant `connection` is bound to, if any.
    #[must_use]
    pub fn tenant_of(&self, connection: &ConnectionId) -> Option<TenantId> {
        self.lock().registry.tenant_of(connection).cloned()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of tenant channels with at least one member.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.lock().registry.channel_count()
    }
}
