//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding, decoding or
/// reassembling SDS messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too short: got {got} bytes, need at least {need}")]
    MessageTooShort { got: usize, need: usize },

    #[error("declared message length {0} is below the 8 byte minimum")]
    BadMessageLength(usize),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("declared message length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("operation code must be set before packing the message")]
    OperationNotSet,

    #[error("unknown parameter type tag {tag:#04x} at offset {offset}")]
    UnknownParameterType { tag: u8, offset: usize },

    #[error("parameter {name} at offset {offset} is truncated")]
    TruncatedParameter { name: String, offset: usize },

    #[error("duplicate parameter {0} in message")]
    DuplicateParameter(String),

    #[error("no such parameter in message: {name} (available: {available})")]
    ParameterNotFound { name: String, available: String },

    #[error("parameter {name} has type {actual}, requested {requested}")]
    ParameterTypeMismatch {
        name: String,
        actual: String,
        requested: String,
    },

    #[error("invalid UTF-8 in string parameter {0}")]
    InvalidUtf8(String),

    #[error("invalid object id {0:?}, expected \"high:low\"")]
    InvalidObjectId(String),
}
