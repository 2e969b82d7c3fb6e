//! RESP (`REdis` Serialization Protocol) value types

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// RESP protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string or null array: $-1\r\n, *-1\r\n
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] for a null reply, [`RedisError::Type`] for anything
    /// that is not a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Null => Err(RedisError::Nil),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] for a null reply, [`RedisError::Type`] otherwise.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(b) => std::str::from_utf8(b)
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?
                .parse::<i64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            Self::SimpleString(s) => s
                .parse::<i64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            Self::Null => Err(RedisError::Nil),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Convert to an unsigned integer (SCAN cursors arrive as bulk strings).
    ///
    /// # Errors
    ///
    /// Same as [`RespValue::as_int`], plus negative values.
    pub fn as_u64(&self) -> RedisResult<u64> {
        match self {
            Self::BulkString(b) => std::str::from_utf8(b)
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?
                .parse::<u64>()
                .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}"))),
            other => u64::try_from(other.as_int()?)
                .map_err(|e| RedisError::Type(format!("Negative value: {e}"))),
        }
    }

    /// Integer reply interpreted as a boolean (non-zero is true)
    ///
    /// # Errors
    ///
    /// Same as [`RespValue::as_int`].
    pub fn as_bool(&self) -> RedisResult<bool> {
        self.as_int().map(|i| i != 0)
    }

    /// Convert to bytes.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] for a null reply, [`RedisError::Type`] otherwise.
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::from(s.as_bytes().to_vec())),
            Self::Null => Err(RedisError::Nil),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to bytes"
            ))),
        }
    }

    /// Borrow the elements of an array reply.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] for a null array, [`RedisError::Type`] otherwise.
    pub fn as_array(&self) -> RedisResult<&[Self]> {
        match self {
            Self::Array(arr) => Ok(arr),
            Self::Null => Err(RedisError::Nil),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to array"
            ))),
        }
    }

    /// Convert an array reply to strings. Null elements (MGET of a missing
    /// key, HMGET of a missing field) become empty strings.
    ///
    /// # Errors
    ///
    /// Fails if the reply is not an array or an element is not a string.
    pub fn as_strings(&self) -> RedisResult<Vec<String>> {
        self.as_array()?
            .iter()
            .map(|item| match item {
                Self::Null => Ok(String::new()),
                other => other.as_string(),
            })
            .collect()
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether this is the `+OK` acknowledgement
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }

    /// Extract error message if this is an error
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl TryFrom<RespValue> for String {
    type Error = RedisError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        value.as_string()
    }
}

impl TryFrom<RespValue> for i64 {
    type Error = RedisError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        value.as_int()
    }
}

impl TryFrom<RespValue> for bool {
    type Error = RedisError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        match value {
            RespValue::Integer(1) => Ok(true),
            RespValue::Integer(0) => Ok(false),
            RespValue::SimpleString(s) if s == "OK" => Ok(true),
            RespValue::Null => Err(RedisError::Nil),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {:?} to bool",
                value
            ))),
        }
    }
}
