//! # sds-client
//!
//! Async TCP client for JANUS application servers.
//!
//! This crate provides:
//! - Connection establishment (HELLO/ACK handshake, client introduction)
//! - Single-flight request/response correlation with per-request timeout
//! - The typed RPC surface (login, run script, class operations, server log)
//! - The crypt(3)-MD5 credential hash the login operation consumes
//!
//! A connection owns exactly one socket and allows at most one request in
//! flight; concurrent callers are serialized in FIFO order. There is no
//! automatic retry or reconnect; every failure is surfaced to the caller.

pub mod client;
pub mod connection;
pub mod crypt;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Client, LogMessages};
pub use connection::{Connection, ConnectionConfig};
pub use crypt::{crypt_md5, janus_password};
pub use error::ClientError;
