//! Inbound message decoder.

use crate::error::ProtocolError;
use crate::message::{
    read_u32_be, ObjectId, ParameterName, ParameterType, ParameterValue, ACK, INVALID, NULL_FLAG,
};
use crate::{FIRST_PARAM_OFFSET, MESSAGE_HEAD_SIZE, SIMPLE_MESSAGE_SIZE};
use bytes::Bytes;

/// One decoded parameter: the raw type tag as received (null flag included)
/// and the decoded value.
#[derive(Debug, Clone)]
struct Parameter {
    name: u8,
    tag: u8,
    value: ParameterValue,
}

/// A complete inbound SDS message with name-indexed, typed access to its
/// parameters.
///
/// The same layout is used for requests and responses on the wire, so this
/// type also decodes client-built messages in tests. The head fields are
/// decoded eagerly at construction; malformed parameters fail [`parse`]
/// rather than a later getter.
///
/// [`parse`]: SdsResponse::parse
#[derive(Debug, Clone)]
pub struct SdsResponse {
    buf: Bytes,
    object_id: ObjectId,
    operation: u8,
    parameters: Vec<Parameter>,
}

impl SdsResponse {
    /// Decodes a buffer that is already known to hold exactly one complete
    /// message (the reassembler resolves message boundaries).
    pub fn parse(buf: Bytes) -> Result<Self, ProtocolError> {
        // the handshake tokens have no parseable head
        if buf == ACK || buf == INVALID {
            return Ok(Self {
                buf,
                object_id: ObjectId::NULL,
                operation: 0,
                parameters: Vec::new(),
            });
        }

        if buf.len() < SIMPLE_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooShort {
                got: buf.len(),
                need: SIMPLE_MESSAGE_SIZE,
            });
        }

        let declared = read_u32_be(&buf, 0) as usize;
        if declared != buf.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        if declared == SIMPLE_MESSAGE_SIZE {
            return Ok(Self {
                buf,
                object_id: ObjectId::NULL,
                operation: 0,
                parameters: Vec::new(),
            });
        }

        if declared < MESSAGE_HEAD_SIZE {
            return Err(ProtocolError::MessageTooShort {
                got: declared,
                need: MESSAGE_HEAD_SIZE,
            });
        }

        let object_id = ObjectId::new(read_u32_be(&buf, 4), read_u32_be(&buf, 8));
        let operation = buf[12];
        let parameters = parse_parameters(&buf, declared)?;

        Ok(Self {
            buf,
            object_id,
            operation,
            parameters,
        })
    }

    /// The object id this message belongs to.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// The operation byte of the message head.
    pub fn operation(&self) -> u8 {
        self.operation
    }

    /// True iff this is an 8-byte simple message (length and result code
    /// only, no parameters).
    pub fn is_simple(&self) -> bool {
        self.buf.len() == SIMPLE_MESSAGE_SIZE
    }

    /// The result code of a simple message. Callers whose contract is signed
    /// reinterpret the value as `i32`.
    pub fn simple_result(&self) -> Option<u32> {
        self.is_simple().then(|| read_u32_be(&self.buf, 4))
    }

    /// True iff this message is the handshake acknowledgment.
    pub fn is_ack(&self) -> bool {
        self.buf == ACK
    }

    /// True iff this message is the handshake rejection.
    pub fn is_invalid(&self) -> bool {
        self.buf == INVALID
    }

    /// True iff the message is a bare 13-byte head with object id `0:0` and
    /// operation 0. Some operations acknowledge with exactly this.
    pub fn is_empty(&self) -> bool {
        self.buf.len() == MESSAGE_HEAD_SIZE && self.object_id.is_null() && self.operation == 0
    }

    /// Looks up a parameter by name.
    pub fn get_parameter(&self, name: ParameterName) -> Result<&ParameterValue, ProtocolError> {
        self.find(name).map(|p| &p.value)
    }

    pub fn has_parameter(&self, name: ParameterName) -> bool {
        self.parameters.iter().any(|p| p.name == name.code())
    }

    /// Returns an Int32 (or Date) parameter as its raw unsigned value.
    pub fn get_int(&self, name: ParameterName) -> Result<u32, ProtocolError> {
        match self.get_typed(name, ParameterType::Int32)? {
            ParameterValue::Int(v) => Ok(*v),
            _ => unreachable!("type tag checked against value"),
        }
    }

    pub fn get_bool(&self, name: ParameterName) -> Result<bool, ProtocolError> {
        match self.get_typed(name, ParameterType::Boolean)? {
            ParameterValue::Bool(v) => Ok(*v),
            _ => unreachable!("type tag checked against value"),
        }
    }

    pub fn get_string(&self, name: ParameterName) -> Result<&str, ProtocolError> {
        match self.get_typed(name, ParameterType::String)? {
            ParameterValue::String(v) => Ok(v),
            _ => unreachable!("type tag checked against value"),
        }
    }

    pub fn get_string_list(&self, name: ParameterName) -> Result<&[String], ProtocolError> {
        match self.get_typed(name, ParameterType::StringList)? {
            ParameterValue::StringList(v) => Ok(v),
            _ => unreachable!("type tag checked against value"),
        }
    }

    pub fn get_oid(&self, name: ParameterName) -> Result<ObjectId, ProtocolError> {
        match self.get_typed(name, ParameterType::Oid)? {
            ParameterValue::Oid(v) => Ok(*v),
            _ => unreachable!("type tag checked against value"),
        }
    }

    /// The raw message bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn find(&self, name: ParameterName) -> Result<&Parameter, ProtocolError> {
        self.parameters
            .iter()
            .find(|p| p.name == name.code())
            .ok_or_else(|| ProtocolError::ParameterNotFound {
                name: ParameterName::describe(name.code()),
                available: self.available_names(),
            })
    }

    fn get_typed(
        &self,
        name: ParameterName,
        requested: ParameterType,
    ) -> Result<&ParameterValue, ProtocolError> {
        let parameter = self.find(name)?;
        let base = ParameterType::from_code(parameter.tag);
        // Date decodes as Int32; accept it where an Int32 is requested
        let matches = match base {
            Some(ParameterType::Date) => requested == ParameterType::Int32,
            Some(base) => base == requested,
            None => false,
        };
        if !matches {
            return Err(ProtocolError::ParameterTypeMismatch {
                name: ParameterName::describe(parameter.name),
                actual: ParameterType::describe(parameter.tag),
                requested: format!("{:?}", requested),
            });
        }
        Ok(&parameter.value)
    }

    fn available_names(&self) -> String {
        if self.parameters.is_empty() {
            return "none".to_string();
        }
        self.parameters
            .iter()
            .map(|p| ParameterName::describe(p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Computes the total wire length of the parameter starting at `offset`.
///
/// This is the single source of truth for parameter lengths; the scan loop
/// and the per-type decoders both derive their offsets from it.
fn param_len(buf: &[u8], offset: usize, end: usize) -> Result<usize, ProtocolError> {
    let tag = buf[offset];
    let ty = ParameterType::from_code(tag).ok_or(ProtocolError::UnknownParameterType {
        tag,
        offset,
    })?;

    // a null-flagged parameter has no payload regardless of base type
    if tag & NULL_FLAG != 0 {
        return Ok(2);
    }

    match ty {
        ParameterType::Boolean => Ok(2),
        ParameterType::Int32 | ParameterType::Date => Ok(2 + 4),
        ParameterType::Oid => Ok(2 + 8),
        ParameterType::String
        | ParameterType::StringList
        | ParameterType::Int32List
        | ParameterType::OidList => {
            if offset + 6 > end {
                return Err(truncated(buf, offset));
            }
            Ok(2 + 4 + read_u32_be(buf, offset + 2) as usize)
        }
    }
}

fn truncated(buf: &[u8], offset: usize) -> ProtocolError {
    let name = buf.get(offset + 1).copied().unwrap_or(0);
    ProtocolError::TruncatedParameter {
        name: ParameterName::describe(name),
        offset,
    }
}

fn parse_parameters(buf: &Bytes, declared: usize) -> Result<Vec<Parameter>, ProtocolError> {
    let mut parameters: Vec<Parameter> = Vec::new();
    let mut offset = FIRST_PARAM_OFFSET;

    while offset < declared {
        if offset + 2 > declared {
            return Err(truncated(buf, offset));
        }

        let len = param_len(buf, offset, declared)?;
        if offset + len > declared {
            return Err(truncated(buf, offset));
        }

        let tag = buf[offset];
        let name = buf[offset + 1];
        let value = decode_value(buf, offset, len)?;

        if parameters.iter().any(|p| p.name == name) {
            // the server never repeats a name; a duplicate means the scan
            // went off the rails or the message is corrupt
            return Err(ProtocolError::DuplicateParameter(ParameterName::describe(
                name,
            )));
        }
        parameters.push(Parameter { name, tag, value });

        offset += len;
    }

    Ok(parameters)
}

fn decode_value(buf: &Bytes, offset: usize, len: usize) -> Result<ParameterValue, ProtocolError> {
    let tag = buf[offset];
    let null = tag & NULL_FLAG != 0;
    // param_len only admits known tags
    let ty = ParameterType::from_code(tag).expect("tag validated by param_len");

    let value = match ty {
        ParameterType::Boolean => ParameterValue::Bool(!null),
        ParameterType::Int32 | ParameterType::Date => {
            if null {
                ParameterValue::Int(0)
            } else {
                ParameterValue::Int(read_u32_be(buf, offset + 2))
            }
        }
        ParameterType::Oid => {
            if null {
                ParameterValue::Oid(ObjectId::NULL)
            } else {
                ParameterValue::Oid(ObjectId::new(
                    read_u32_be(buf, offset + 2),
                    read_u32_be(buf, offset + 6),
                ))
            }
        }
        ParameterType::String => {
            if null {
                ParameterValue::String(String::new())
            } else {
                let size = read_u32_be(buf, offset + 2) as usize;
                if size == 0 {
                    return Err(truncated(buf, offset));
                }
                ParameterValue::String(decode_str(buf, offset + 6, size)?.to_string())
            }
        }
        ParameterType::StringList => {
            if null {
                ParameterValue::StringList(Vec::new())
            } else {
                ParameterValue::StringList(decode_string_list(buf, offset, offset + len)?)
            }
        }
        ParameterType::Int32List | ParameterType::OidList => {
            // the server is not known to send these to clients
            return Err(ProtocolError::UnknownParameterType { tag, offset });
        }
    };
    Ok(value)
}

/// Reads a zero-terminated UTF-8 string whose declared size includes the
/// terminator.
fn decode_str(buf: &Bytes, offset: usize, size: usize) -> Result<&str, ProtocolError> {
    let bytes = &buf[offset..offset + size - 1];
    std::str::from_utf8(bytes).map_err(|_| {
        ProtocolError::InvalidUtf8(format!("{} bytes at offset {}", size - 1, offset))
    })
}

fn decode_string_list(
    buf: &Bytes,
    offset: usize,
    end: usize,
) -> Result<Vec<String>, ProtocolError> {
    if offset + 10 > end {
        return Err(truncated(buf, offset));
    }
    let count = read_u32_be(buf, offset + 6) as usize;
    let mut values = Vec::with_capacity(count.min(64));
    let mut ptr = offset + 10;

    for _ in 0..count {
        if ptr + 4 > end {
            return Err(truncated(buf, offset));
        }
        let size = read_u32_be(buf, ptr) as usize;
        ptr += 4;
        if size == 0 || ptr + size > end {
            return Err(truncated(buf, offset));
        }
        values.push(decode_str(buf, ptr, size)?.to_string());
        ptr += size;
    }

    Ok(values)
}
