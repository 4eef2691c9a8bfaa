//! # bsonwire-protocol
//!
//! Legacy wire protocol messages for bsonwire.
//!
//! This crate provides:
//! - The standard message header, opcodes and the process-wide request id counter
//! - Query, GetMore, KillCursors, Insert, Update and Delete messages
//! - OP_REPLY parsing
//! - Reassembly of messages from a socket's byte stream
//! - Nonce challenge-response key derivation

pub mod auth;
pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod namespace;
mod reader;
pub mod reply;

pub use codec::MessageBuffer;
pub use error::ProtocolError;
pub use header::{next_request_id, MessageHeader, OpCode, HEADER_SIZE};
pub use message::{Delete, GetMore, Insert, KillCursors, Query, QueryFlags, Request, Update, WireMessage};
pub use namespace::Namespace;
pub use reply::{Reply, ResponseFlags, REPLY_PREFIX_SIZE};

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

/// Largest message accepted from or sent to a server.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;
