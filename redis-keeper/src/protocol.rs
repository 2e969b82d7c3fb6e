//! RESP2 protocol implementation
//!
//! Commands go out as arrays of bulk strings; replies come back as any of the
//! five RESP2 types. The decoder works on a cursor over whatever has been read
//! so far and reports `Ok(None)` when the frame is not complete yet, leaving
//! the cursor position meaningless in that case.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use redis_keeper_core::{
    error::{RedisError, RedisResult},
    types::Command,
    value::RespValue,
};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encodes commands (and, for servers and tests, arbitrary values) into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Append a command to `buf` as an array of bulk strings
    pub fn encode_command(command: &Command, buf: &mut BytesMut) {
        let args = command.args();
        Self::put_header(buf, b'*', (1 + args.len()) as i64);
        Self::put_bulk(buf, command.name().as_bytes());
        for arg in args {
            Self::put_bulk(buf, arg.as_bytes());
        }
    }

    /// Append a RESP value to `buf`
    pub fn encode(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => Self::put_header(buf, b':', *i),
            RespValue::BulkString(data) => Self::put_bulk(buf, data),
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(arr) => {
                Self::put_header(buf, b'*', arr.len() as i64);
                for item in arr {
                    Self::encode(item, buf);
                }
            }
        }
    }

    fn put_header(buf: &mut BytesMut, prefix: u8, n: i64) {
        buf.put_u8(prefix);
        buf.put_slice(n.to_string().as_bytes());
        buf.put_slice(CRLF);
    }

    fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
        Self::put_header(buf, b'$', data.len() as i64);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// Decodes RESP values from bytes
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one RESP value from the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Protocol`] for malformed input.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let type_byte = buf.chunk()[0];
        buf.advance(1);

        let Some(line) = Self::read_line(buf) else {
            return Ok(None);
        };

        match type_byte {
            b'+' => Ok(Some(RespValue::SimpleString(Self::utf8(line)?))),
            b'-' => Ok(Some(RespValue::Error(Self::utf8(line)?))),
            b':' => Ok(Some(RespValue::Integer(Self::integer(line)?))),
            b'$' => Self::decode_bulk_string(buf, Self::integer(line)?),
            b'*' => Self::decode_array(buf, Self::integer(line)?),
            _ => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: {:?}",
                type_byte as char
            ))),
        }
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>, len: i64) -> RedisResult<Option<RespValue>> {
        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid bulk string length: {len}")))?;

        if buf.remaining() < len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len);

        if buf.chunk()[..2] != *CRLF {
            return Err(RedisError::Protocol(
                "Bulk string not terminated by CRLF".to_string(),
            ));
        }
        buf.advance(2);

        Ok(Some(RespValue::BulkString(data)))
    }

    fn decode_array(buf: &mut Cursor<&[u8]>, len: i64) -> RedisResult<Option<RespValue>> {
        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid array length: {len}")))?;

        let mut arr = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match Self::decode(buf)? {
                Some(value) => arr.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(RespValue::Array(arr)))
    }

    fn read_line<'a>(buf: &mut Cursor<&'a [u8]>) -> Option<&'a [u8]> {
        let start = buf.position() as usize;
        let slice: &'a [u8] = *buf.get_ref();

        let end = slice[start..].windows(2).position(|w| w == CRLF)? + start;
        buf.set_position((end + 2) as u64);
        Some(&slice[start..end])
    }

    fn utf8(line: &[u8]) -> RedisResult<String> {
        String::from_utf8(line.to_vec())
            .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {}", e)))
    }

    fn integer(line: &[u8]) -> RedisResult<i64> {
        std::str::from_utf8(line)
            .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {}", e)))?
            .parse::<i64>()
            .map_err(|e| RedisError::Protocol(format!("Invalid integer: {}", e)))
    }
}
