//! Shared realtime types for the Comanda server.
//!
//! This module defines the identifiers and frames flowing through the realtime
//! layer. Events are immutable once created and are shared between channel
//! members behind an [`Arc`], so fanning out to many sockets never copies the
//! payload.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Longest tenant identifier accepted from clients or configuration.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Client signal asking to bind the connection to a company channel.
pub const JOIN_COMPANY_ROOM: &str = "join_company_room";

/// Server acknowledgement sent after every successful bind.
pub const JOINED_COMPANY_ROOM: &str = "joined_company_room";

/// Server greeting sent once after a connection is accepted.
pub const CONNECTED: &str = "connected";

// ============================================================================
// Identifiers
// ============================================================================

/// Reasons a raw value cannot be turned into a [`TenantId`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantParseError {
    /// The identifier was empty or whitespace only.
    #[error("tenant id is empty")]
    Empty,

    /// The identifier exceeded [`MAX_TENANT_ID_LEN`] characters.
    #[error("tenant id exceeds {MAX_TENANT_ID_LEN} characters")]
    TooLong,

    /// The JSON value was not a string or an integer.
    #[error("tenant id must be a string or an integer, got {0}")]
    UnsupportedType(&'static str),
}

/// Opaque company ("empresa") identifier scoping all realtime traffic.
///
/// Tenant ids are always supplied by upstream authentication or by the
/// client's join signal; this crate never invents one. Integer and string
/// forms are equivalent: `42` and `"42"` name the same tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Parses a tenant id from text, trimming surrounding whitespace.
    ///
    /// # Example
    ///
    /// ```rust
    /// use comanda_server::types::TenantId;
    ///
    /// let tenant = TenantId::parse(" 42 ").unwrap();
    /// assert_eq!(tenant.as_str(), "42");
    /// assert!(TenantId::parse("   ").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TenantParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenantParseError::Empty);
        }
        if trimmed.chars().count() > MAX_TENANT_ID_LEN {
            return Err(TenantParseError::TooLong);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Resolves a tenant id carried in a JSON signal payload.
    ///
    /// Accepts strings and integers. Everything else (null, booleans, floats,
    /// arrays, objects) is rejected.
    pub fn from_json(value: &Value) -> Result<Self, TenantParseError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::parse(&n.to_string()),
            Value::Number(_) => Err(TenantParseError::UnsupportedType("float")),
            Value::Null => Err(TenantParseError::UnsupportedType("null")),
            Value::Bool(_) => Err(TenantParseError::UnsupportedType("boolean")),
            Value::Array(_) => Err(TenantParseError::UnsupportedType("array")),
            Value::Object(_) => Err(TenantParseError::UnsupportedType("object")),
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier of one live realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// A named payload delivered to one tenant's channel.
///
/// Serialized exactly as it is sent to clients:
/// `{"event": "order_created", "data": {...}, "emitted_at": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. `order_created`.
    pub event: String,

    /// Arbitrary JSON payload chosen by the publishing route.
    pub data: Value,

    /// When the event was handed to the publisher.
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            emitted_at: Utc::now(),
        }
    }
}

// ============================================================================
// Wire Frames
// ============================================================================

/// Raw frame received from a realtime client.
///
/// The `data` field is kept as untyped JSON; interpreting it is the job of
/// the connection lifecycle manager so that malformed payloads can be
/// ignored without tearing the connection down.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    /// Signal name, e.g. `join_company_room`.
    pub event: String,

    /// Signal argument.
    #[serde(default)]
    pub data: Value,
}

/// Frame queued for delivery to a single realtime client.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    /// Greeting carrying the id assigned on accept.
    Connected { connection_id: ConnectionId },

    /// Confirmation that the connection is a member of this tenant's channel.
    Joined { tenant: TenantId },

    /// A published event.
    Event(Arc<Event>),

    /// Server-initiated close; the writer sends a close frame and stops.
    Close,
}

/// JSON shape shared by every outbound frame.
#[derive(Serialize)]
struct WireFrame<'a> {
    event: &'a str,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    emitted_at: Option<&'a DateTime<Utc>>,
}

impl ServerFrame {
    /// Serializes the frame into its JSON text form.
    ///
    /// Returns `None` for [`ServerFrame::Close`], which has no text form.
    pub fn to_json(&self) -> Option<serde_json::Result<String>> {
        match self {
            Self::Connected { connection_id } => {
                let data = json!({ "connection_id": connection_id });
                Some(serde_json::to_string(&WireFrame {
                    event: CONNECTED,
                    data: &data,
                    emitted_at: None,
                }))
            }
            Self::Joined { tenant } => {
                let data = json!({ "empresa_id": tenant });
                Some(serde_json::to_string(&WireFrame {
                    event: JOINED_COMPANY_ROOM,
                    data: &data,
                    emitted_at: None,
                }))
            }
            Self::Event(event) => Some(serde_json::to_string(&WireFrame {
                event: &event.event,
                data: &event.data,
                emitted_at: Some(&event.emitted_at),
            })),
            Self::Close => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_accepts_string_and_integer_forms() {
        let from_int = TenantId::from_json(&json!(42)).unwrap();
        let from_str = TenantId::from_json(&json!("42")).unwrap();
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.as_str(), "42");
    }

    #[test]
    fn tenant_id_rejects_unresolvable_values() {
        assert_eq!(
            TenantId::from_json(&Value::Null),
            Err(TenantParseError::UnsupportedType("null"))
        );
        assert_eq!(
            TenantId::from_json(&json!(true)),
            Err(TenantParseError::UnsupportedType("boolean"))
        );
        assert_eq!(
            TenantId::from_json(&json!(4.2)),
            Err(TenantParseError::UnsupportedType("float"))
        );
        assert_eq!(
            TenantId::from_json(&json!({"id": 42})),
            Err(TenantParseError::UnsupportedType("object"))
        );
        assert_eq!(TenantId::from_json(&json!("  ")), Err(TenantParseError::Empty));
    }

    #[test]
    fn tenant_id_rejects_overlong_values() {
        let long = "9".repeat(MAX_TENANT_ID_LEN + 1);
        assert_eq!(TenantId::parse(&long), Err(TenantParseError::TooLong));
        assert!(TenantId::parse(&"9".repeat(MAX_TENANT_ID_LEN)).is_ok());
    }

    #[test]
    fn tenant_id_deserializes_through_from_json() {
        let tenant: TenantId = serde_json::from_str("7").unwrap();
        assert_eq!(tenant.to_string(), "7");
        assert!(serde_json::from_str::<TenantId>("null").is_err());
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn client_frame_defaults_missing_data_to_null() {
        let frame: ClientFrame = serde_json::from_str(r#"{"event":"join_company_room"}"#).unwrap();
        assert_eq!(frame.event, JOIN_COMPANY_ROOM);
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn event_frame_serializes_with_timestamp() {
        let event = Arc::new(Event::new("order_created", json!({"id": 1})));
        let json = ServerFrame::Event(event).to_json().unwrap().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "order_created");
        assert_eq!(value["data"]["id"], 1);
        assert!(value["emitted_at"].is_string());
    }

    #[test]
    fn joined_frame_carries_tenant() {
        let frame = ServerFrame::Joined {
            tenant: TenantId::parse("42").unwrap(),
        };
        let value: Value = serde_json::from_str(&frame.to_json().unwrap().unwrap()).unwrap();
        assert_eq!(value["event"], JOINED_COMPANY_ROOM);
        assert_eq!(value["data"]["empresa_id"], "42");
        assert!(value.get("emitted_at").is_none());
    }

    #[test]
    fn close_frame_has_no_text_form() {
        assert!(ServerFrame::Close.to_json().is_none());
    }
}
