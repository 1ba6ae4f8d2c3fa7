//! Incremental stream reassembly.
//!
//! TCP delivers the server's messages in arbitrary chunks: one chunk may
//! hold a fraction of a message, exactly one message, or the tail of one
//! message followed by several complete ones and the head of the next. The
//! scanner buffers partial data and yields complete messages one at a time,
//! in arrival order.

use crate::error::ProtocolError;
use crate::message::{read_u32_be, ACK, INVALID};
use crate::response::SdsResponse;
use crate::{LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE, SIMPLE_MESSAGE_SIZE};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Initial capacity of the accumulation buffer.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Reassembles framed messages out of arbitrarily chunked byte deliveries.
///
/// Feed every received chunk to [`extend`], then drain completed messages
/// with [`next_message`] until it returns `Ok(None)`:
///
/// ```
/// use sds_protocol::MessageScanner;
///
/// let mut scanner = MessageScanner::new();
/// scanner.extend(&[0, 0, 0, 8]);
/// assert!(scanner.next_message().unwrap().is_none());
/// scanner.extend(&[0, 0, 0, 42]);
/// let message = scanner.next_message().unwrap().unwrap();
/// assert_eq!(message.simple_result(), Some(42));
/// ```
///
/// A chunk that byte-equals one of the un-framed handshake tokens (`ACK`,
/// `INVALID`) is emitted as-is without touching the reassembly state. The
/// tokens are assumed never to be split across chunks or coalesced with
/// framed data; the servers in the field send them as lone segments.
///
/// A decode failure consumes exactly the offending message's bytes, so the
/// next message parses cleanly.
#[derive(Debug)]
pub struct MessageScanner {
    /// Accumulated framed bytes not yet resolved into messages.
    buf: BytesMut,
    /// Declared total size of the message currently being assembled;
    /// 0 means the next buffered bytes start with a length prefix.
    expected: usize,
    /// Handshake tokens awaiting delivery, ahead of any framed data.
    tokens: VecDeque<Bytes>,
}

impl MessageScanner {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            expected: 0,
            tokens: VecDeque::new(),
        }
    }

    /// Appends a received chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        if chunk == ACK || chunk == INVALID {
            self.tokens.push_back(Bytes::copy_from_slice(chunk));
            return;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Yields the next complete message, or `Ok(None)` if more bytes are
    /// needed.
    pub fn next_message(&mut self) -> Result<Option<SdsResponse>, ProtocolError> {
        if let Some(token) = self.tokens.pop_front() {
            return SdsResponse::parse(token).map(Some);
        }

        if self.expected == 0 {
            // a chunk boundary may fall inside the length prefix itself;
            // wait until all four bytes are here before interpreting them
            if self.buf.len() < LENGTH_PREFIX_SIZE {
                return Ok(None);
            }
            let declared = read_u32_be(&self.buf, 0) as usize;
            if declared < SIMPLE_MESSAGE_SIZE {
                self.reset();
                return Err(ProtocolError::BadMessageLength(declared));
            }
            if declared > MAX_MESSAGE_SIZE {
                self.reset();
                return Err(ProtocolError::MessageTooLarge {
                    size: declared,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            self.expected = declared;
        }

        if self.buf.len() < self.expected {
            return Ok(None);
        }

        let frame = self.buf.split_to(self.expected).freeze();
        self.expected = 0;
        tracing::trace!(len = frame.len(), buffered = self.buf.len(), "message complete");
        SdsResponse::parse(frame).map(Some)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discards all reassembly state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = 0;
        self.tokens.clear();
    }
}

impl Default for MessageScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Operation, ParameterName};
    use crate::request::SdsRequest;

    fn sample_message(marker: u32) -> Bytes {
        let mut request = SdsRequest::with_operation(Operation::ComOperation);
        request.add_parameter(ParameterName::Value, marker);
        request.add_parameter(ParameterName::Parameter, "chunk boundary test");
        request.pack().unwrap()
    }

    fn drain(scanner: &mut MessageScanner) -> Vec<SdsResponse> {
        let mut out = Vec::new();
        while let Some(message) = scanner.next_message().unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_whole_message_in_one_chunk() {
        let message = sample_message(1);
        let mut scanner = MessageScanner::new();
        scanner.extend(&message);

        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 1);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_single_byte_chunks() {
        let message = sample_message(2);
        let mut scanner = MessageScanner::new();

        let mut out = Vec::new();
        for byte in message.iter() {
            scanner.extend(&[*byte]);
            out.extend(drain(&mut scanner));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 2);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_every_split_point() {
        let message = sample_message(3);
        for split in 1..message.len() {
            let mut scanner = MessageScanner::new();
            scanner.extend(&message[..split]);
            assert!(
                scanner.next_message().unwrap().is_none(),
                "emitted early at split {split}"
            );
            scanner.extend(&message[split..]);
            let out = drain(&mut scanner);
            assert_eq!(out.len(), 1, "split at {split}");
            assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 3);
            assert_eq!(scanner.buffered(), 0, "split at {split}");
        }
    }

    #[test]
    fn test_split_inside_length_prefix() {
        let message = sample_message(4);
        let mut scanner = MessageScanner::new();
        scanner.extend(&message[..2]);
        assert!(scanner.next_message().unwrap().is_none());
        scanner.extend(&message[2..5]);
        assert!(scanner.next_message().unwrap().is_none());
        scanner.extend(&message[5..]);

        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 4);
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let first = sample_message(5);
        let second = sample_message(6);
        let mut chunk = first.to_vec();
        chunk.extend_from_slice(&second);

        let mut scanner = MessageScanner::new();
        scanner.extend(&chunk);
        let out = drain(&mut scanner);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 5);
        assert_eq!(out[1].get_int(ParameterName::Value).unwrap(), 6);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_chunk_completes_one_message_and_starts_next() {
        let first = sample_message(7);
        let second = sample_message(8);
        let mut stream = first.to_vec();
        stream.extend_from_slice(&second);

        // split in the middle of the first and in the middle of the second
        let cut_a = first.len() / 2;
        let cut_b = first.len() + second.len() / 2;

        let mut scanner = MessageScanner::new();
        let mut out = Vec::new();
        for chunk in [&stream[..cut_a], &stream[cut_a..cut_b], &stream[cut_b..]] {
            scanner.extend(chunk);
            out.extend(drain(&mut scanner));
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 7);
        assert_eq!(out[1].get_int(ParameterName::Value).unwrap(), 8);
    }

    #[test]
    fn test_ack_and_invalid_tokens() {
        let mut scanner = MessageScanner::new();
        scanner.extend(ACK);
        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ack());

        scanner.extend(INVALID);
        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_invalid());
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_token_does_not_disturb_partial_message() {
        let message = sample_message(9);
        let mut scanner = MessageScanner::new();
        scanner.extend(&message[..6]);
        scanner.extend(ACK);

        let first = scanner.next_message().unwrap().unwrap();
        assert!(first.is_ack());
        assert!(scanner.next_message().unwrap().is_none());

        scanner.extend(&message[6..]);
        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 9);
    }

    #[test]
    fn test_bad_declared_length() {
        let mut scanner = MessageScanner::new();
        scanner.extend(&[0, 0, 0, 3, 9, 9, 9]);
        assert!(matches!(
            scanner.next_message(),
            Err(ProtocolError::BadMessageLength(3))
        ));
        // state is reset; a valid message afterwards parses cleanly
        assert_eq!(scanner.buffered(), 0);
        scanner.extend(&sample_message(10));
        let out = drain(&mut scanner);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 10);
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut scanner = MessageScanner::new();
        scanner.extend(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            scanner.next_message(),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_decode_error_does_not_corrupt_following_message() {
        // a framed message with an unknown parameter type tag, followed by
        // a valid message in the same chunk
        let mut bad = vec![0, 0, 0, 15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x2a, 1];
        bad.extend_from_slice(&sample_message(11));

        let mut scanner = MessageScanner::new();
        scanner.extend(&bad);
        assert!(matches!(
            scanner.next_message(),
            Err(ProtocolError::UnknownParameterType { .. })
        ));

        let out = drain(&mut scanner);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_int(ParameterName::Value).unwrap(), 11);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_no_message_emitted_twice() {
        let message = sample_message(12);
        let mut scanner = MessageScanner::new();
        scanner.extend(&message);
        assert_eq!(drain(&mut scanner).len(), 1);
        assert_eq!(drain(&mut scanner).len(), 0);
        assert!(scanner.next_message().unwrap().is_none());
    }
}
