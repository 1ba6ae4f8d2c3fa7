//! Protocol constants and value types shared by requests and responses.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// First message a client sends after the TCP connect. The first four bytes
/// could be picked at random with the last four a crypt(3)-MD5 of them; every
/// known client sends this fixed sequence instead.
pub const HELLO: &[u8] = b"GGCH$1$$";

/// Acknowledgment the server answers a HELLO with. Zero-terminated, no
/// length prefix.
pub const ACK: &[u8] = b"valid\0";

/// Rejection the server answers an unacceptable HELLO with. No terminator,
/// no length prefix.
pub const INVALID: &[u8] = b"invalid";

/// Null/false flag bit, or'ed into a parameter's type tag. A null-flagged
/// non-boolean parameter carries no payload bytes.
pub const NULL_FLAG: u8 = 0x80;

/// Writes a 32-bit unsigned value at `offset` in big-endian (network) byte
/// order. Panics if `buf` is too short; an out-of-range offset is a
/// programmer error, not a recoverable condition.
pub fn write_u32_be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Reads a 32-bit unsigned value at `offset` in big-endian (network) byte
/// order. Panics if `buf` is too short.
pub fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap())
}

/// Server-side operations invoked by this client. The values are protocol
/// constants and carry no meaning beyond routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    ChangeUser = 27,
    DisconnectClient = 49,
    SetLanguage = 59,
    CallClassOperation = 101,
    ComOperation = 199,
    ChangePrincipal = 203,
    SrvGui = 209,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

/// Sub-operations multiplexed under [`Operation::ComOperation`], selected via
/// the `Index` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComOperation {
    ErrorMessage = 17,
    RunScriptOnServer = 42,
}

/// Sub-operations multiplexed under [`Operation::SrvGui`], selected via the
/// `Opcode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SrvGuiOperation {
    GetMessages = 10,
}

/// Names of parameters and return values of server side operations.
///
/// The table is incomplete; the server knows more codes than this client
/// ever sends or reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParameterName {
    ClientId = 1,
    ClassAndOp = 2,
    Value = 4,
    ReturnValue = 5,
    Something = 8,
    Index = 13,
    Language = 14,
    ClassId = 16,
    IsTransactionObject = 18,
    User = 21,
    Password = 22,
    Last = 25,
    Properties = 29,
    UserId = 40,
    Parameter = 48,
    ParameterPdo = 49,
    Conversion = 51,
    Init = 53,
    Principal = 80,
    Filename = 87,
    Opcode = 88,
    Flag = 119,
}

impl ParameterName {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use ParameterName::*;
        let name = match code {
            1 => ClientId,
            2 => ClassAndOp,
            4 => Value,
            5 => ReturnValue,
            8 => Something,
            13 => Index,
            14 => Language,
            16 => ClassId,
            18 => IsTransactionObject,
            21 => User,
            22 => Password,
            25 => Last,
            29 => Properties,
            40 => UserId,
            48 => Parameter,
            49 => ParameterPdo,
            51 => Conversion,
            53 => Init,
            80 => Principal,
            87 => Filename,
            88 => Opcode,
            119 => Flag,
            _ => return None,
        };
        Some(name)
    }

    /// Human-readable rendering of a raw name code, e.g. `"User(21)"`, or
    /// just the number if the code is not in the table.
    pub fn describe(code: u8) -> String {
        match Self::from_code(code) {
            Some(name) => format!("{:?}({})", name, code),
            None => code.to_string(),
        }
    }
}

/// Base type tags of message parameters. Bit 7 ([`NULL_FLAG`]) is or'ed
/// into the tag on the wire and is orthogonal to the base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParameterType {
    Boolean = 2,
    Int32 = 3,
    Date = 4,
    String = 7,
    Oid = 9,
    Int32List = 10,
    StringList = 11,
    OidList = 12,
}

impl ParameterType {
    pub fn from_code(code: u8) -> Option<Self> {
        use ParameterType::*;
        let ty = match code & !NULL_FLAG {
            2 => Boolean,
            3 => Int32,
            4 => Date,
            7 => String,
            9 => Oid,
            10 => Int32List,
            11 => StringList,
            12 => OidList,
            _ => return None,
        };
        Some(ty)
    }

    pub fn describe(code: u8) -> String {
        match Self::from_code(code) {
            Some(ty) => format!("{:?}", ty),
            None => format!("{:#04x}", code & !NULL_FLAG),
        }
    }
}

/// A 64-bit object identifier: two 32-bit halves identifying a server-side
/// object instance. `0:0` denotes "no object / global operation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectId {
    pub high: u32,
    pub low: u32,
}

impl ObjectId {
    /// The null object id, used for global server operations.
    pub const NULL: ObjectId = ObjectId { high: 0, low: 0 };

    pub fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high, self.low)
    }
}

impl FromStr for ObjectId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (high, low) = s
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidObjectId(s.to_string()))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| ProtocolError::InvalidObjectId(s.to_string()))
        };
        if low.contains(':') {
            return Err(ProtocolError::InvalidObjectId(s.to_string()));
        }
        Ok(ObjectId::new(parse(high)?, parse(low)?))
    }
}

/// A typed parameter value.
///
/// The encoder dispatches exhaustively on this enum, so an unsupported value
/// shape is a compile error rather than a runtime fault. Integers are raw
/// unsigned 32-bit as on the wire; operations whose contract is signed
/// reinterpret them as `i32` at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Bool(bool),
    Int(u32),
    Oid(ObjectId),
    String(String),
    StringList(Vec<String>),
}

impl ParameterValue {
    pub fn base_type(&self) -> ParameterType {
        match self {
            ParameterValue::Bool(_) => ParameterType::Boolean,
            ParameterValue::Int(_) => ParameterType::Int32,
            ParameterValue::Oid(_) => ParameterType::Oid,
            ParameterValue::String(_) => ParameterType::String,
            ParameterValue::StringList(_) => ParameterType::StringList,
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<u32> for ParameterValue {
    fn from(v: u32) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v as u32)
    }
}

impl From<ObjectId> for ParameterValue {
    fn from(v: ObjectId) -> Self {
        ParameterValue::Oid(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::String(v)
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(v: Vec<String>) -> Self {
        ParameterValue::StringList(v)
    }
}

impl From<&[String]> for ParameterValue {
    fn from(v: &[String]) -> Self {
        ParameterValue::StringList(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_be_roundtrip() {
        let mut buf = [0u8; 8];
        write_u32_be(&mut buf, 2, 0xdead_beef);
        assert_eq!(&buf[..2], &[0, 0]);
        assert_eq!(&buf[2..6], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(read_u32_be(&buf, 2), 0xdead_beef);
    }

    #[test]
    fn test_handshake_literals() {
        assert_eq!(HELLO.len(), 8);
        assert_eq!(ACK.len(), 6);
        assert_eq!(ACK[5], 0);
        assert_eq!(INVALID.len(), 7);
        assert_eq!(INVALID, b"invalid");
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::ChangeUser as u8, 27);
        assert_eq!(Operation::DisconnectClient as u8, 49);
        assert_eq!(Operation::SetLanguage as u8, 59);
        assert_eq!(Operation::CallClassOperation as u8, 101);
        assert_eq!(Operation::ComOperation as u8, 199);
        assert_eq!(Operation::ChangePrincipal as u8, 203);
        assert_eq!(Operation::SrvGui as u8, 209);
        assert_eq!(ComOperation::ErrorMessage as u8, 17);
        assert_eq!(ComOperation::RunScriptOnServer as u8, 42);
        assert_eq!(SrvGuiOperation::GetMessages as u8, 10);
    }

    #[test]
    fn test_parameter_name_codes() {
        assert_eq!(ParameterName::ClientId.code(), 1);
        assert_eq!(ParameterName::ReturnValue.code(), 5);
        assert_eq!(ParameterName::User.code(), 21);
        assert_eq!(ParameterName::Password.code(), 22);
        assert_eq!(ParameterName::from_code(40), Some(ParameterName::UserId));
        assert_eq!(ParameterName::from_code(0), None);
        assert_eq!(ParameterName::describe(21), "User(21)");
        assert_eq!(ParameterName::describe(200), "200");
    }

    #[test]
    fn test_parameter_type_null_flag_masked() {
        assert_eq!(
            ParameterType::from_code(7 | NULL_FLAG),
            Some(ParameterType::String)
        );
        assert_eq!(ParameterType::from_code(2), Some(ParameterType::Boolean));
        assert_eq!(ParameterType::from_code(0x2a), None);
    }

    #[test]
    fn test_object_id_display_parse() {
        let oid = ObjectId::new(123, 456);
        assert_eq!(oid.to_string(), "123:456");
        assert_eq!("123:456".parse::<ObjectId>().unwrap(), oid);
        assert_eq!("0:0".parse::<ObjectId>().unwrap(), ObjectId::NULL);
        assert!(ObjectId::NULL.is_null());
        assert!("123".parse::<ObjectId>().is_err());
        assert!("1:2:3".parse::<ObjectId>().is_err());
        assert!("a:b".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_parameter_value_conversions() {
        assert_eq!(ParameterValue::from(true), ParameterValue::Bool(true));
        assert_eq!(ParameterValue::from(9u32), ParameterValue::Int(9));
        assert_eq!(ParameterValue::from(-1i32), ParameterValue::Int(u32::MAX));
        assert_eq!(
            ParameterValue::from("abc"),
            ParameterValue::String("abc".into())
        );
        let list = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            ParameterValue::from(list.clone()),
            ParameterValue::StringList(list)
        );
    }
}
