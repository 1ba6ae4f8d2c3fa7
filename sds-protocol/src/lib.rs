//! # sds-protocol
//!
//! Wire protocol implementation for SDS, the binary RPC protocol spoken by
//! JANUS application servers.
//!
//! This crate provides:
//! - The message framing (length-prefixed full messages, 8-byte simple
//!   messages, fixed handshake tokens)
//! - Typed parameter encoding ([`SdsRequest`]) and decoding ([`SdsResponse`])
//! - Incremental TCP stream reassembly ([`MessageScanner`])
//!
//! There is no public specification of SDS; the format is reverse-engineered
//! from the server's wire behavior. Everything here operates on byte buffers
//! and performs no I/O.

pub mod error;
pub mod message;
pub mod request;
pub mod response;
pub mod scanner;

pub use error::ProtocolError;
pub use message::{
    read_u32_be, write_u32_be, ComOperation, ObjectId, Operation, ParameterName, ParameterType,
    ParameterValue, SrvGuiOperation, ACK, HELLO, INVALID, NULL_FLAG,
};
pub use request::SdsRequest;
pub use response::SdsResponse;
pub use scanner::MessageScanner;

/// Default port a JANUS server listens on.
pub const DEFAULT_PORT: u16 = 11000;

/// Maximum accepted declared message size (16 MiB). A corrupt length prefix
/// must not trigger unbounded buffering in the reassembler.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Byte length of the length prefix of a full message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Byte length of a simple message (length prefix + result code).
pub const SIMPLE_MESSAGE_SIZE: usize = 8;

/// Byte length of a full message head: length prefix, object id, operation.
pub const MESSAGE_HEAD_SIZE: usize = 13;

/// Offset of the first parameter in a full message.
pub const FIRST_PARAM_OFFSET: usize = 13;
