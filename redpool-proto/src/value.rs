//! # Reply Values
//!
//! Purpose: Give callers a reply type that has no wire-level error variant.
//! Error replies are split off during conversion so that the only way a
//! failure reaches a caller is through an error type.

use std::fmt;

use thiserror::Error;

use crate::resp::RespValue;

/// Error reply sent by the store, e.g. `ERR wrong number of arguments`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ErrorReply(pub String);

/// Reply value delivered to callers.
///
/// Null bulk strings and null arrays both become [`Value::Nil`], so an absent
/// result always has one explicit representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// No value (missing key, null array).
    Nil,
    /// Integer reply.
    Int(i64),
    /// Bulk string reply, binary-safe.
    Data(Vec<u8>),
    /// Status reply such as `OK` or `PONG`.
    Status(String),
    /// Multi-bulk reply.
    Array(Vec<Value>),
}

impl Value {
    /// Converts a wire reply, failing on the first error reply found.
    pub fn from_resp(resp: RespValue) -> Result<Self, ErrorReply> {
        match resp {
            RespValue::Simple(text) => Ok(Value::Status(String::from_utf8_lossy(&text).into_owned())),
            RespValue::Error(text) => Err(ErrorReply(String::from_utf8_lossy(&text).into_owned())),
            RespValue::Integer(value) => Ok(Value::Int(value)),
            RespValue::Bulk(Some(data)) => Ok(Value::Data(data)),
            RespValue::Bulk(None) | RespValue::Array(None) => Ok(Value::Nil),
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(Value::from_resp)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Raw bytes of a bulk or status reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(data) => Some(data),
            Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// UTF-8 view of a bulk or status reply.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Integer view; bulk strings holding a decimal number also qualify.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Data(_) => self.as_str().and_then(|text| text.parse().ok()),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<i64> for Value {
    fn eq(&self, other: &i64) -> bool {
        matches!(self, Value::Int(value) if value == other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Int(value) => write!(f, "(integer) {}", value),
            Value::Data(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Value::Status(text) => write!(f, "{}", text),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
