//! Comanda Server - Multi-tenant realtime gateway.
//!
//! This crate provides the server component of Comanda, responsible for:
//! - Accepting realtime (WebSocket) connections from restaurant screens
//! - Binding each connection to one company ("empresa") channel
//! - Giving every HTTP request a handle to publish events to its company
//! - Running requests through one pipeline with a single error stage
//!
//! # Architecture
//!
//! ```text
//! HTTP request -> pipeline -> context binder -> route handler --publish--+
//!                                                                        v
//! WebSocket <- writer task <- outbound queue <---------------------- publisher
//!     |                                                                  ^
//!     +-> reader -> connection manager -> channel registry (in hub) ----+
//! ```
//!
//! Realtime state lives in one [`hub::Hub`]. Events are delivered best-effort
//! to currently connected members only; nothing is persisted.

pub mod body;
pub mod config;
pub mod connection;
pub mod context;
pub mod database;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod publisher;
pub mod realtime;
pub mod registry;
pub mod routes;
pub mod tenant;
pub mod types;
