//! Message types for actor communication.
//!
//! Each actor has a message enum; request/response pairs carry a oneshot
//! `respond_to` sender. Fire-and-forget messages have none.

use crate::broadcast::BroadcastReport;
use crate::errors::RelayError;
use crate::fingerprint::ChannelFingerprint;
use crate::protocol::{ClientEvent, ClientRole, ServerEvent};
use crate::state::{ChannelState, StateDelta};
use common::types::ConnectionId;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// ChannelActor Messages
// ============================================================================

/// Messages sent to a `ChannelActor`.
#[derive(Debug)]
pub enum ChannelMessage {
    /// Make a connection the provider of record. Clears any orphan mark.
    ///
    /// Responds with the previous provider, if any.
    ClaimProvider {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<ConnectionId>>,
    },

    /// Add a consumer. A re-attach by the same connection replaces its entry.
    ///
    /// Responds with the consumer count after the attach.
    AttachConsumer {
        link: ConnectionLink,
        respond_to: oneshot::Sender<usize>,
    },

    /// Remove a consumer. Responds with whether an entry was removed.
    DetachConsumer {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Drop provider status if the connection still holds it.
    ///
    /// Responds with whether the channel was orphaned by this call.
    ReleaseProvider {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Merge a validated delta and fan it out to consumers.
    ApplyUpdate {
        connection_id: ConnectionId,
        delta: StateDelta,
        respond_to: oneshot::Sender<Result<BroadcastReport, RelayError>>,
    },

    /// Read-only view of the channel.
    GetSnapshot {
        respond_to: oneshot::Sender<ChannelSnapshot>,
    },
}

/// A connection's outbound queue, as held by a channel.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    pub connection_id: ConnectionId,
    pub outbound: mpsc::Sender<ServerEvent>,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub fingerprint: ChannelFingerprint,
    pub state: ChannelState,
    pub provider: Option<ConnectionId>,
    pub consumers: Vec<ConnectionId>,
    /// True while the channel has no provider and the grace period is running.
    pub orphaned: bool,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub updates_applied: u64,
}

// ============================================================================
// ConnectionActor Messages
// ============================================================================

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Decoded client event, in arrival order.
    Inbound { event: ClientEvent },

    /// Frame that could not be decoded.
    Malformed { error: RelayError },

    /// Transport closed.
    Disconnected,

    /// Current session state.
    GetSession {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Per-connection session state machine.
///
/// `Unjoined -> Joined` on a successful join, `Joined -> Joined` when the
/// connection joins again (possibly a different channel or role), and any state
/// moves to `Closed` on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined {
        role: ClientRole,
        fingerprint: ChannelFingerprint,
    },
    Closed,
}

impl SessionState {
    /// State label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unjoined => "unjoined",
            SessionState::Joined { .. } => "joined",
            SessionState::Closed => "closed",
        }
    }
}
