//! Channel Relay Service Library
//!
//! A real-time relay that connects one data **provider** to many **consumers**
//! over a shared channel:
//!
//! - A channel is named by `hex(SHA-256(channel_id || password))`; knowing the
//!   pair is the only credential
//! - Only a provider join creates a channel; consumers can only attach
//! - Providers push partial state updates (`solar`, `battery`, `consumption`)
//!   that are validated, merged, and fanned out to the channel's consumers
//! - State is in memory only and lives as long as the channel
//!
//! # Architecture
//!
//! ```text
//! transport::websocket ──► ConnectionActor ──► ChannelRegistry
//!          ▲                     │                   │
//!          │                     ▼                   ▼
//!   outbound queue ◄──── Broadcaster ◄──────── ChannelActor
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Channel and connection actors
//! - [`broadcast`] - Non-blocking fan-out to consumer queues
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and client-safe messages
//! - [`fingerprint`] - Channel fingerprint derivation
//! - [`hub`] - Entry point that opens connections
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`protocol`] - Wire events
//! - [`registry`] - Fingerprint to channel map
//! - [`state`] - Channel state and update validation
//! - [`transport`] - WebSocket transport

pub mod actors;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod hub;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod transport;
