//! Gateway service: webhook ingest and real-time fan-out to subscribers.
//!
//! This service:
//! - Answers the notification source's subscription-validation handshake
//! - Normalizes incoming event batches against the rule table
//! - Broadcasts results to every connected WebSocket subscriber
//! - Keeps subscribers alive with heartbeats and drops dead ones
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook
//!         ↓
//! ValidationHandshake (short-circuits)
//!         ↓
//! Normalizer (RuleTable, UriTemplate, TopologyProvider)
//!         ↓
//! BroadcastHub (DashMap-based, lock-free)
//!         ↓
//! WebSocket subscribers (/ws)
//! ```

pub mod config;
pub mod error;
pub mod handshake;
pub mod hub;
pub mod protocol;
pub mod webhook;
pub mod ws_server;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use handshake::{ValidationResponse, SUBSCRIPTION_VALIDATION_EVENT};
pub use hub::{BroadcastHub, BroadcastOutcome, Connection, ConnectionId, ConnectionState, HubConfig};
pub use ws_server::{create_router, AppState};
