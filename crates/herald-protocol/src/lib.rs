//! # herald-protocol
//!
//! Wire protocol for the Herald broadcast relay.
//!
//! Clients subscribe to channels, unsubscribe, and send client events; the
//! relay answers with application events and presence notifications. Frames
//! travel either as JSON text messages or as length-prefixed MessagePack.
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, ClientFrame, ServerFrame};
//!
//! let frame: ClientFrame =
//!     codec::decode_text(r#"{"event":"subscribe","data":{"channel":"chat"}}"#).unwrap();
//! assert!(matches!(frame, ClientFrame::Subscribe(_)));
//!
//! let reply = ServerFrame::event("message", "chat", serde_json::json!({"text": "hi"}));
//! let text = codec::encode_text(&reply).unwrap();
//! assert!(text.contains("\"chat\""));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, decode_text, encode, encode_text, ProtocolError};
pub use frames::{events, AuthOptions, ClientFrame, ServerFrame, Subscription};
