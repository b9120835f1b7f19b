//! Client-facing transports.
//!
//! A transport owns the socket: it decodes inbound frames and hands them to the
//! connection's actor, and drains the connection's outbound queue back to the
//! client. It never touches channel state directly.

pub mod websocket;

pub use websocket::ws_router;
