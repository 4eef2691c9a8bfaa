//! # bsonwire-client
//!
//! Async client for servers speaking the legacy BSON wire protocol.
//!
//! This crate provides:
//! - Pooled connections that queue sends and reconnect when a socket drops
//! - Reply correlation through a shared pending-request table
//! - Cursors that page through results with GetMore and clean up with KillCursors
//! - Single server and replica set discovery
//! - Commands, nonce authentication and acknowledged writes
//!
//! ```no_run
//! use bsonwire_bson::doc;
//! use bsonwire_client::{Client, WriteConcern};
//! use bsonwire_protocol::Namespace;
//!
//! # async fn run() -> Result<(), bsonwire_client::ClientError> {
//! let client = Client::with_uri("mongodb://localhost:27017/app").await?;
//! let users = Namespace::new("app", "users");
//! client
//!     .insert(users.clone(), vec![doc! { "name" => "ada" }], &WriteConcern::acknowledged())
//!     .await?;
//! let everyone = client.find(users, doc! {})?.to_array().await?;
//! # let _ = everyone;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod pending;
pub mod topology;

pub use client::Client;
pub use command::{run_command, WriteConcern};
pub use config::{ClientOptions, Credentials, ServerAddress};
pub use connection::{Connection, ConnectionState, Dispatch, SendOutcome};
pub use cursor::{Cursor, CursorState};
pub use error::ClientError;
pub use topology::{ServerRole, Topology};
