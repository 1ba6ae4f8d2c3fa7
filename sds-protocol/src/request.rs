//! Outbound message encoder.

use crate::error::ProtocolError;
use crate::message::{
    write_u32_be, ObjectId, ParameterName, ParameterType, ParameterValue, NULL_FLAG,
};
use crate::LENGTH_PREFIX_SIZE;
use bytes::{BufMut, Bytes, BytesMut};

/// Initial capacity of the message buffer. Common messages fit without
/// reallocation; growth past this is geometric.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Size of the head slot reserved at the front of the buffer: 8 object-id
/// bytes plus the operation byte. The 4-byte length prefix is prepended by
/// [`SdsRequest::pack`].
const HEAD_SIZE: usize = 9;

/// An outbound SDS message under construction.
///
/// The buffer holds the 9-byte head (object id, operation) followed by the
/// encoded parameters; [`SdsRequest::pack`] prepends the length prefix and
/// yields the wire-ready bytes.
///
/// ```
/// use sds_protocol::{Operation, ParameterName, SdsRequest};
///
/// let mut request = SdsRequest::new();
/// request.set_operation(Operation::ChangeUser);
/// request.add_parameter(ParameterName::User, "mickey");
/// request.add_parameter(ParameterName::Password, "");
/// let packed = request.pack().unwrap();
/// ```
#[derive(Debug)]
pub struct SdsRequest {
    buf: BytesMut,
    operation: Option<u8>,
}

impl SdsRequest {
    /// Creates a message with a zeroed head: object id `0:0` (global server
    /// operation) and no operation chosen yet.
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
        buf.resize(HEAD_SIZE, 0);
        Self {
            buf,
            operation: None,
        }
    }

    /// Creates a message with the operation already set.
    pub fn with_operation(operation: impl Into<u8>) -> Self {
        let mut request = Self::new();
        request.set_operation(operation);
        request
    }

    /// Overwrites the object id in the reserved head slot.
    pub fn set_object_id(&mut self, oid: ObjectId) {
        write_u32_be(&mut self.buf, 0, oid.high);
        write_u32_be(&mut self.buf, 4, oid.low);
    }

    /// Sets the operation byte in the reserved head slot.
    ///
    /// Operation code 0 is a legitimate value (the client intro uses it), so
    /// "no operation set" is tracked separately and packing without one is an
    /// error rather than a silent default.
    pub fn set_operation(&mut self, operation: impl Into<u8>) {
        let code = operation.into();
        self.buf[8] = code;
        self.operation = Some(code);
    }

    pub fn operation(&self) -> Option<u8> {
        self.operation
    }

    /// Appends raw bytes to the message body. Used for the client intro,
    /// whose body is a bare zero-terminated string rather than an encoded
    /// parameter.
    pub fn add_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a typed parameter, dispatching on the value's wire encoding.
    pub fn add_parameter(&mut self, name: ParameterName, value: impl Into<ParameterValue>) {
        match value.into() {
            ParameterValue::Bool(v) => self.add_bool(name, v),
            ParameterValue::Int(v) => self.add_int(name, v),
            ParameterValue::Oid(v) => self.add_oid(name, v),
            ParameterValue::String(v) => self.add_string(name, &v),
            ParameterValue::StringList(v) => self.add_string_list(name, &v),
        }
    }

    /// Returns the wire-ready message: a 4-byte big-endian total length
    /// (including itself) followed by the accumulated head and body.
    pub fn pack(&self) -> Result<Bytes, ProtocolError> {
        if self.operation.is_none() {
            return Err(ProtocolError::OperationNotSet);
        }

        let total = self.buf.len() + LENGTH_PREFIX_SIZE;
        let mut packed = BytesMut::with_capacity(total);
        packed.put_u32(total as u32);
        packed.extend_from_slice(&self.buf);
        Ok(packed.freeze())
    }

    /// Number of bytes accumulated so far, excluding the length prefix.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == HEAD_SIZE
    }

    fn put_head(&mut self, ty: ParameterType, null: bool, name: ParameterName) {
        let mut tag = ty as u8;
        if null {
            tag |= NULL_FLAG;
        }
        self.buf.put_u8(tag);
        self.buf.put_u8(name.code());
    }

    fn add_bool(&mut self, name: ParameterName, value: bool) {
        // false is encoded as the null flag on the type tag; there is no
        // payload in either case
        self.put_head(ParameterType::Boolean, !value, name);
    }

    fn add_int(&mut self, name: ParameterName, value: u32) {
        self.put_head(ParameterType::Int32, false, name);
        self.buf.put_u32(value);
    }

    fn add_oid(&mut self, name: ParameterName, value: ObjectId) {
        self.put_head(ParameterType::Oid, false, name);
        self.buf.put_u32(value.high);
        self.buf.put_u32(value.low);
    }

    fn add_string(&mut self, name: ParameterName, value: &str) {
        self.put_head(ParameterType::String, false, name);
        self.buf.put_u32(term_utf8_len(value) as u32);
        self.put_term_utf8(value);
    }

    fn add_string_list(&mut self, name: ParameterName, values: &[String]) {
        self.put_head(ParameterType::StringList, false, name);

        // data part: element count, then per element a length-prefixed
        // zero-terminated string; the size field counts everything after it
        let data_size: usize = 4 + values
            .iter()
            .map(|v| 4 + term_utf8_len(v))
            .sum::<usize>();
        self.buf.put_u32(data_size as u32);
        self.buf.put_u32(values.len() as u32);
        for value in values {
            self.buf.put_u32(term_utf8_len(value) as u32);
            self.put_term_utf8(value);
        }
    }

    fn put_term_utf8(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.put_u8(0);
    }
}

impl Default for SdsRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of bytes of a UTF-8 string plus its 0-terminator.
fn term_utf8_len(value: &str) -> usize {
    value.len() + 1
}
