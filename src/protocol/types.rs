//! RESP Reply Types
//!
//! This module defines [`Reply`], one parsed reply frame from the server,
//! together with the typed extraction functions completions use to turn a
//! reply into the shape a caller asked for.
//!
//! ## Protocol Format
//!
//! Each RESP frame starts with a type prefix byte:
//! - `+` Status (simple string)
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array (multi-bulk)
//!
//! All frames are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Null Bulk String: `$-1\r\n`
//!
//! ## Lazy Errors
//!
//! An `Error` reply keeps the server's text as-is. It only becomes a
//! [`RedisError`] when somebody extracts a value from it, so replies that are
//! inspected but never consumed (queued acknowledgments, nested EXEC results
//! for cancelled callers) cost nothing beyond the parse.

use crate::error::{RedisError, Result};
use crate::protocol::literal::Literal;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single reply from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status line such as `OK`, `QUEUED` or `PONG`.
    /// Format: `+<string>\r\n`
    Status(Bytes),

    /// Error reported by the server.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe bulk string, `None` for `$-1` (and the null array `*-1`).
    Bulk(Option<Bytes>),

    /// Multi-bulk array; may nest.
    Multi(Vec<Reply>),

    /// Synthesized for timed pings: how long the ping waited in the outbound
    /// queue and how long the server took to answer once it was written.
    Timing { queued: Duration, round_trip: Duration },
}

impl Reply {
    /// Creates a status reply.
    pub fn status(s: impl Into<Bytes>) -> Self {
        Reply::Status(s.into())
    }

    /// Creates an error reply.
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    /// Creates a non-null bulk reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    /// The null reply.
    pub fn null() -> Self {
        Reply::Bulk(None)
    }

    /// Returns true only for the `Error` variant.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns true for a null bulk.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None))
    }

    /// Short name of the active variant, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(Some(_)) => "bulk",
            Reply::Bulk(None) => "null",
            Reply::Multi(_) => "multi-bulk",
            Reply::Timing { .. } => "timing",
        }
    }

    /// Applies a fixed-acknowledgment check.
    ///
    /// Error replies pass through untouched. Anything else must equal
    /// `expected` byte for byte or it is converted into an `Error` reply.
    pub fn expect_literal(self, expected: Literal) -> Reply {
        let matches = match &self {
            Reply::Error(_) => return self,
            Reply::Status(data) | Reply::Bulk(Some(data)) => data.as_ref() == expected.as_bytes(),
            _ => false,
        };
        if matches {
            self
        } else {
            Reply::Error(format!("Expected {}, got {}", expected, self))
        }
    }

    /// Turns an `Error` reply into a [`RedisError::Server`].
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(message) => Err(RedisError::Server(message)),
            other => Ok(other),
        }
    }

    fn mismatch(&self, expected: &'static str) -> RedisError {
        RedisError::TypeMismatch {
            expected,
            actual: self.kind(),
        }
    }

    /// Extracts an integer (`:` replies, or numeric status / bulk text).
    /// A ping timing reply yields its round trip in milliseconds.
    pub fn into_i64(self) -> Result<i64> {
        match self.into_result()? {
            Reply::Integer(n) => Ok(n),
            Reply::Status(data) | Reply::Bulk(Some(data)) => parse_text::<i64>(&data),
            Reply::Timing { round_trip, .. } => {
                Ok(i64::try_from(round_trip.as_millis()).unwrap_or(i64::MAX))
            }
            other => Err(other.mismatch("integer")),
        }
    }

    /// Extracts a boolean: non-zero integers and `OK` status are true.
    pub fn into_bool(self) -> Result<bool> {
        match self.into_result()? {
            Reply::Integer(n) => Ok(n != 0),
            Reply::Status(data) => Ok(data.as_ref() == Literal::Ok.as_bytes()),
            Reply::Bulk(None) => Ok(false),
            Reply::Bulk(Some(data)) => Ok(parse_text::<i64>(&data)? != 0),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Extracts a floating point number.
    pub fn into_f64(self) -> Result<f64> {
        match self.into_result()? {
            Reply::Integer(n) => Ok(n as f64),
            Reply::Status(data) | Reply::Bulk(Some(data)) => parse_text::<f64>(&data),
            other => Err(other.mismatch("double")),
        }
    }

    /// Extracts an optional UTF-8 string.
    pub fn into_string(self) -> Result<Option<String>> {
        match self.into_result()? {
            Reply::Bulk(None) => Ok(None),
            Reply::Status(data) | Reply::Bulk(Some(data)) => utf8(data).map(Some),
            Reply::Integer(n) => Ok(Some(n.to_string())),
            other => Err(other.mismatch("string")),
        }
    }

    /// Extracts optional raw bytes.
    pub fn into_bytes(self) -> Result<Option<Bytes>> {
        match self.into_result()? {
            Reply::Bulk(data) => Ok(data),
            Reply::Status(data) => Ok(Some(data)),
            other => Err(other.mismatch("bytes")),
        }
    }

    /// Extracts an array of optional strings.
    pub fn into_strings(self) -> Result<Vec<Option<String>>> {
        match self.into_result()? {
            Reply::Multi(items) => items.into_iter().map(Reply::into_string).collect(),
            other => Err(other.mismatch("multi-bulk")),
        }
    }

    /// Extracts an array of optional byte strings.
    pub fn into_multi_bytes(self) -> Result<Vec<Option<Bytes>>> {
        match self.into_result()? {
            Reply::Multi(items) => items.into_iter().map(Reply::into_bytes).collect(),
            other => Err(other.mismatch("multi-bulk")),
        }
    }

    /// Extracts `member, score, member, score, ...` into pairs.
    pub fn into_pairs(self) -> Result<Vec<(Bytes, f64)>> {
        let items = match self.into_result()? {
            Reply::Multi(items) => items,
            other => return Err(other.mismatch("multi-bulk")),
        };
        if items.len() % 2 != 0 {
            return Err(RedisError::InvalidValue(format!(
                "expected an even number of items, got {}",
                items.len()
            )));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
            let member = member
                .into_bytes()?
                .ok_or_else(|| RedisError::InvalidValue("null member".to_string()))?;
            pairs.push((member, score.into_f64()?));
        }
        Ok(pairs)
    }

    /// Accepts any non-error reply.
    pub fn into_unit(self) -> Result<()> {
        self.into_result().map(|_| ())
    }

    /// Returns the reply itself, surfacing server errors.
    pub fn into_reply(self) -> Result<Reply> {
        self.into_result()
    }
}

fn utf8(data: Bytes) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|e| RedisError::InvalidValue(e.to_string()))
}

fn parse_text<T: std::str::FromStr>(data: &[u8]) -> Result<T> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| {
            RedisError::InvalidValue(format!(
                "not a number: {:?}",
                String::from_utf8_lossy(data)
            ))
        })
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(Some(data)) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Reply::Bulk(None) => write!(f, "(nil)"),
            Reply::Multi(values) => write!(f, "(array of {})", values.len()),
            Reply::Timing { round_trip, .. } => write!(f, "(ping) {:?}", round_trip),
        }
    }
}
