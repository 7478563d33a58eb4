//! # herald-core
//!
//! Channels, presence and broadcast dispatch for the Herald relay.
//!
//! This crate provides the building blocks the server wires together:
//!
//! - **Channel** - Name-based classification (public, private, presence)
//! - **ChannelManager** - Subscribe/unsubscribe/client events, with authorization
//! - **PresenceRegistry** - Deduplicated, self-reconciling member lists
//! - **Dispatcher** - Fan-out of ingested events with sender exclusion
//! - **Fanout** - Rooms of live sockets; [`LocalFanout`] for a single node
//! - **MembershipStore** - Key-value persistence of member lists
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────┐     ┌──────────────────┐
//! │   Socket    │────▶│ ChannelManager │────▶│ PresenceRegistry │
//! └─────────────┘     └────────────────┘     └──────────────────┘
//!                             │                   │         │
//!                             ▼                   ▼         ▼
//! ┌─────────────┐     ┌────────────────┐   ┌──────────┐ ┌─────────────────┐
//! │  Ingestion  │────▶│   Dispatcher   │──▶│  Fanout  │ │ MembershipStore │
//! └─────────────┘     └────────────────┘   └──────────┘ └─────────────────┘
//! ```

pub mod auth;
pub mod channel;
pub mod dispatcher;
pub mod fanout;
pub mod hub;
pub mod manager;
pub mod member;
pub mod message;
pub mod presence;
pub mod store;

pub use auth::{AuthError, AuthRequest, AuthResponse, Authenticator};
pub use channel::{is_presence, ChannelId, ChannelKind, ChannelRules};
pub use dispatcher::Dispatcher;
pub use fanout::{Fanout, FanoutError, SocketId, SocketInfo};
pub use hub::{FrameReceiver, FrameSender, HubStats, LocalFanout};
pub use manager::{ChannelManager, JoinOutcome};
pub use member::{dedup_by_user, Member};
pub use message::Message;
pub use presence::PresenceRegistry;
pub use store::{MembershipStore, MemoryStore, StoreError, UnconfiguredStore};
