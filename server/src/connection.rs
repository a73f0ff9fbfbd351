//! Realtime connection lifecycle.
//!
//! Each socket is modelled as a small state machine:
//!
//! ```text
//! Connecting --accept--> Open --disconnect--> Closed
//!                         |  ^
//!                         +--+ join_company_room (bind / rebind)
//! ```
//!
//! [`ConnectionManager`] is the single dispatch point for every transition.
//! The transport driver in [`crate::realtime`] calls [`ConnectionManager::accept`]
//! once, feeds each parsed client signal to [`ConnectionManager::handle_signal`],
//! and calls [`ConnectionManager::disconnect`] exactly once when the transport
//! goes away. `Closed` is terminal: the connection is discarded and no further
//! frames or binds reach it.
//!
//! # Backpressure
//!
//! Each connection's outbound queue holds at most [`OUTBOUND_CAPACITY`]
//! frames. Frames offered to a full queue are dropped and reported as a
//! failed delivery; a slow client loses events instead of growing memory.
//! The tenant binding itself lives only in the
//! [`ChannelRegistry`](crate::registry::ChannelRegistry).

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::hub::Hub;
use crate::types::{
    ClientFrame, ConnectionId, ServerFrame, TenantId, TenantParseError, JOIN_COMPANY_ROOM,
};

/// Lifecycle state of a realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted but not yet registered.
    Connecting,
    /// Registered and able to join channels and receive events.
    Open,
    /// Transport gone. Terminal.
    Closed,
}

/// Maximum number of frames queued for one connection's writer.
///
/// Sized for burst traffic (1000 frames). A client that falls this far
/// behind starts missing events.
pub const OUTBOUND_CAPACITY: usize = 1000;

/// A frame could not be queued for a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The writer has stopped or the connection is not open.
    #[error("connection {0} is no longer receiving frames")]
    Closed(ConnectionId),

    /// The outbound queue is at capacity; the frame was dropped.
    #[error("outbound queue for connection {0} is full")]
    Full(ConnectionId),
}

impl DeliveryError {
    pub(crate) fn from_try_send<T>(id: ConnectionId, err: &TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::Full(id),
            TrySendError::Closed(_) => Self::Closed(id),
        }
    }
}

/// Failures while handling a client signal.
///
/// None of these close the connection; the transport driver logs them and
/// keeps reading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// The client sent a signal name this server does not understand.
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    /// The join payload did not resolve to a tenant id.
    #[error("invalid tenant id: {0}")]
    InvalidTenant(#[from] TenantParseError),

    /// The connection is closed or was never accepted.
    #[error("connection {0} is not open")]
    NotOpen(ConnectionId),
}

/// Application-level signals a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// Bind to a tenant channel. The payload is resolved on dispatch.
    JoinCompanyRoom(Value),
}

impl TryFrom<ClientFrame> for ClientSignal {
    type Error = SignalError;

    fn try_from(frame: ClientFrame) -> Result<Self, Self::Error> {
        match frame.event.as_str() {
            JOIN_COMPANY_ROOM => Ok(Self::JoinCompanyRoom(frame.data)),
            _ => Err(SignalError::UnknownSignal(frame.event)),
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection entered `tenant`'s channel, leaving `previous` if it had one.
    Joined {
        tenant: TenantId,
        previous: Option<TenantId>,
    },
    /// The connection was already a member of `tenant`'s channel.
    AlreadyMember { tenant: TenantId },
}

/// One live realtime connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    outbound: Sender<ServerFrame>,
}

impl Connection {
    fn new(outbound: Sender<ServerFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            state: ConnectionState::Connecting,
            outbound,
        }
    }

    /// The id assigned on accept.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queues a frame for the connection's writer.
    ///
    /// Fails once the writer has stopped or the queue is full; never blocks.
    pub(crate) fn deliver(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        if self.state != ConnectionState::Open {
            return Err(DeliveryError::Closed(self.id));
        }
        self.outbound
            .try_send(frame)
            .map_err(|err| DeliveryError::from_try_send(self.id, &err))
    }

    /// Returns a sender usable outside the hub lock.
    pub(crate) fn outbound(&self) -> Sender<ServerFrame> {
        self.outbound.clone()
    }
}

/// Drives connection state transitions against the shared [`Hub`].
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    hub: Arc<Hub>,
}

impl ConnectionManager {
    /// Creates a manager over `hub`.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Registers a newly accepted transport and moves it to `Open`.
    ///
    /// `outbound` is the queue drained by the connection's writer task,
    /// normally created with [`OUTBOUND_CAPACITY`]. A `connected` greeting
    /// carrying the new id is queued immediately.
    pub fn accept(&self, outbound: Sender<ServerFrame>) -> ConnectionId {
        let mut connection = Connection::new(outbound);
        connection.state = ConnectionState::Open;
        let id = connection.id;

        if connection
            .deliver(ServerFrame::Connected { connection_id: id })
            .is_err()
        {
            debug!(connection_id = %id, "Writer gone before greeting was queued");
        }

        let total = {
            let mut hub = self.hub.lock();
            hub.connections.insert(id, connection);
            hub.connections.len()
        };

        info!(
            connection_id = %id,
            total_connections = total,
            "Realtime client connected"
        );
        id
    }

    /// Single dispatch point for client signals.
    pub fn handle_signal(
        &self,
        id: ConnectionId,
        signal: ClientSignal,
    ) -> Result<JoinOutcome, SignalError> {
        match signal {
            ClientSignal::JoinCompanyRoom(raw) => self.join(id, &raw),
        }
    }

    /// Binds connection `id` to the tenant named by `raw`.
    ///
    /// A connection may switch tenants at any time while open; the last join
    /// wins. Joining the tenant it already belongs to only re-confirms
    /// membership. Every successful join queues a `joined_company_room`
    /// acknowledgement. On failure the connection stays open and keeps its
    /// current binding.
    pub fn join(&self, id: ConnectionId, raw: &Value) -> Result<JoinOutcome, SignalError> {
        let tenant = TenantId::from_json(raw)?;

        let mut hub = self.hub.lock();
        let hub = &mut *hub;

        let connection = match hub.connections.get(&id) {
            Some(conn) if conn.state == ConnectionState::Open => conn,
            _ => return Err(SignalError::NotOpen(id)),
        };

        let outcome = if hub.registry.tenant_of(&id) == Some(&tenant) {
            JoinOutcome::AlreadyMember {
                tenant: tenant.clone(),
            }
        } else {
            let previous = hub.registry.bind(id, tenant.clone());
            JoinOutcome::Joined {
                tenant: tenant.clone(),
                previous,
            }
        };

        if let Err(err) = connection.deliver(ServerFrame::Joined {
            tenant: tenant.clone(),
        }) {
            debug!(error = %err, "Join acknowledgement not delivered");
        }

        match &outcome {
            JoinOutcome::Joined { previous, .. } => info!(
                connection_id = %id,
                empresa_id = %tenant,
                previous = previous.as_ref().map(TenantId::as_str),
                "Realtime client joined company channel"
            ),
            JoinOutcome::AlreadyMember { .. } => debug!(
                connection_id = %id,
                empresa_id = %tenant,
                "Realtime client re-joined its current channel"
            ),
        }

        Ok(outcome)
    }

    /// Moves connection `id` to `Closed`, unbinds it and discards it.
    ///
    /// Returns the closed connection, or `None` if it was already gone.
    /// Calling this twice is harmless.
    pub fn disconnect(&self, id: ConnectionId) -> Option<Connection> {
        let (mut connection, tenant, remaining) = {
            let mut hub = self.hub.lock();
            let connection = hub.connections.remove(&id)?;
            let tenant = hub.registry.unbind(id);
            (connection, tenant, hub.connections.len())
        };

        connection.state = ConnectionState::Closed;

        info!(
            connection_id = %id,
            empresa_id = tenant.as_ref().map(TenantId::as_str),
            remaining_connections = remaining,
            "Realtime client disconnected"
        );
        Some(connection)
    }

    /// Asks every open connection's writer to send a close frame.
    ///
    /// Connections leave the hub through [`disconnect`](Self::disconnect)
    /// once their transport driver observes the close. Returns how many
    /// connections were signalled.
    pub fn close_all(&self) -> usize {
        let hub = self.hub.lock();
        let mut signalled = 0;
        for connection in hub.connections.values() {
            match connection.deliver(ServerFrame::Close) {
                Ok(()) => signalled += 1,
                Err(err) => warn!(error = %err, "Could not signal close"),
            }
        }
        signalled
    }

    /// Current state of connection `id`.
    ///
    /// Connections that were disconnected (or never existed) report `Closed`.
    #[must_use]
    pub fn state_of(&self, id: &ConnectionId) -> ConnectionState {
        self.hub
            .lock()
            .connections
            .get(id)
            .map_or(ConnectionState::Closed, Connection::state)
    }
}
