//! # Tickets Protocol
//!
//! Wire protocol spoken between the ticket cache master and its workers.
//!
//! A worker keeps one WebSocket open to the master. Every binary WebSocket
//! message carries exactly one [`Envelope`]: a transaction ID plus a
//! [`Payload`], which is either a [`TaskRequest`] (master to worker) or a
//! [`TaskResult`] (worker to master).
//!
//! ## Wire Format
//!
//! ```text
//! [u8 version][u8 kind][u64 transaction id][body...]
//!
//! kind 1 (task request): [u32 len][target url, utf-8]
//! kind 2 (task result):  [u8 status][u32 len][fetched bytes | failure message]
//! ```
//!
//! All integers are big-endian.
//!
//! ## Example
//!
//! ```rust
//! use tickets_protocol::{Envelope, Payload, TaskRequest};
//!
//! let envelope = Envelope::new(7, Payload::TaskRequest(TaskRequest::new("https://example.com")));
//! let frame = envelope.encode();
//! let decoded = Envelope::decode(&frame).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;

pub use error::{ProtocolError, Result};
pub use message::{Envelope, MessageKind, Payload, TaskRequest, TaskResult, TransactionId};

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum size of a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the fixed envelope header (version, kind, transaction id).
pub const HEADER_LEN: usize = 1 + 1 + 8;
