//! Tenant channel bookkeeping.
//!
//! [`ChannelRegistry`] maps each tenant to the set of connections currently
//! bound to its channel. It is plain data: no I/O, no locking, no delivery.
//! Sharing it between tasks is the job of [`crate::hub::Hub`].
//!
//! A connection is a member of at most one channel at a time. Binding an
//! already bound connection moves it, and empty channels are dropped as soon
//! as their last member leaves.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::types::{ConnectionId, TenantId};

/// Mapping of tenant id to the connections bound to its channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<TenantId, HashSet<ConnectionId>>,
    bindings: HashMap<ConnectionId, TenantId>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `connection` to `tenant`'s channel.
    ///
    /// If the connection was bound to another tenant it is removed from that
    /// channel first. Returns the tenant it was previously bound to, if any;
    /// re-binding to the same tenant returns that same tenant and changes
    /// nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use comanda_server::registry::ChannelRegistry;
    /// use comanda_server::types::{ConnectionId, TenantId};
    ///
    /// let mut registry = ChannelRegistry::new();
    /// let conn = ConnectionId::new();
    /// let t1 = TenantId::parse("1").unwrap();
    /// let t2 = TenantId::parse("2").unwrap();
    ///
    /// registry.bind(conn, t1.clone());
    /// assert_eq!(registry.bind(conn, t2.clone()), Some(t1.clone()));
    /// assert!(registry.members_of(&t1).is_empty());
    /// assert!(registry.members_of(&t2).contains(&conn));
    /// ```
    pub fn bind(&mut self, connection: ConnectionId, tenant: TenantId) -> Option<TenantId> {
        if self.bindings.get(&connection) == Some(&tenant) {
            return Some(tenant);
        }

        let previous = self.unbind(connection);

        self.channels
            .entry(tenant.clone())
            .or_default()
            .insert(connection);
        trace!(
            connection_id = %connection,
            empresa_id = %tenant,
            "Connection bound to channel"
        );
        self.bindings.insert(connection, tenant);

        previous
    }

    /// Removes `connection` from whichever channel holds it.
    ///
    /// Returns the tenant it was bound to. Unknown or unbound connections are
    /// a no-op and return `None`.
    pub fn unbind(&mut self, connection: ConnectionId) -> Option<TenantId> {
        let tenant = self.bindings.remove(&connection)?;

        if let Some(members) = self.channels.get_mut(&tenant) {
            members.remove(&connection);
            if members.is_empty() {
                self.channels.remove(&tenant);
                trace!(empresa_id = %tenant, "Removed empty channel");
            }
        }

        Some(tenant)
    }

    /// Returns the connections currently bound to `tenant`.
    ///
    /// Unknown tenants yield an empty set.
    #[must_use]
    pub fn members_of(&self, tenant: &TenantId) -> HashSet<ConnectionId> {
        self.channels.get(tenant).cloned().unwrap_or_default()
    }

    /// Returns the tenant `connection` is bound to, if any.
    #[must_use]
    pub fn tenant_of(&self, connection: &ConnectionId) -> Option<&TenantId> {
        self.bindings.get(connection)
    }

    /// Number of channels with at least one member.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
