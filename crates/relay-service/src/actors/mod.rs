//! Actor model implementation for the relay.
//!
//! ```text
//! ChannelRegistry (one per process, owns the root cancellation token)
//! └── ChannelActor (one per live fingerprint)
//!     ├── owns channel state
//!     └── holds the outbound queue of each attached consumer
//!
//! ConnectionHub
//! └── ConnectionActor (one per transport connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Channel is the serialization point**: all mutation of one channel goes
//!   through its actor, so updates are applied and fanned out in arrival order
//! - **CancellationToken propagation**: every actor runs on a child of the
//!   registry's token; cancelling it stops the whole tree
//! - **Mailbox monitoring**: Depth thresholds with metrics (Channel: 100/500, Connection: 50/200)
//! - **Message passing**: All inter-actor communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`channel`] - `ChannelActor` per live channel
//! - [`connection`] - `ConnectionActor` per transport connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod channel;
pub mod connection;
pub mod messages;
pub mod metrics;

// Re-export primary types
pub use channel::{ChannelActor, ChannelActorHandle, ChannelSettings};
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
