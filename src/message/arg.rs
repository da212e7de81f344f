//! Command Arguments

use crate::protocol::encode::{format_double, write_bulk, write_double, write_integer};
use crate::protocol::Literal;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// One positional argument of a command.
///
/// Every variant goes on the wire as a bulk string; the variant only decides
/// how the text is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A keyword from the static literal table (`WITHSCORES`, `SLEEP`, ...).
    Literal(Literal),
    /// UTF-8 text.
    Text(String),
    /// Arbitrary bytes.
    Blob(Bytes),
    /// A signed integer.
    Integer(i64),
    /// A double.
    Double(f64),
    /// An exclusive range bound, written as `(<value>`.
    Exclusive(f64),
}

impl Arg {
    /// An exclusive score bound for range commands.
    pub fn exclusive(value: f64) -> Arg {
        Arg::Exclusive(value)
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Arg::Literal(literal) => write_bulk(buf, literal.as_bytes()),
            Arg::Text(text) => write_bulk(buf, text.as_bytes()),
            Arg::Blob(data) => write_bulk(buf, data),
            Arg::Integer(n) => write_integer(buf, *n),
            Arg::Double(value) => write_double(buf, *value),
            Arg::Exclusive(value) => {
                let text = format!("({}", format_double(*value));
                write_bulk(buf, text.as_bytes());
            }
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Literal(literal) => write!(f, "{}", literal),
            Arg::Text(text) => f.write_str(text),
            Arg::Blob(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Arg::Integer(n) => write!(f, "{}", n),
            Arg::Double(value) => f.write_str(&format_double(*value)),
            Arg::Exclusive(value) => write!(f, "({}", format_double(*value)),
        }
    }
}

impl From<Literal> for Arg {
    fn from(literal: Literal) -> Self {
        Arg::Literal(literal)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Text(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Text(text)
    }
}

impl From<&String> for Arg {
    fn from(text: &String) -> Self {
        Arg::Text(text.clone())
    }
}

impl From<Bytes> for Arg {
    fn from(data: Bytes) -> Self {
        Arg::Blob(data)
    }
}

impl From<&[u8]> for Arg {
    fn from(data: &[u8]) -> Self {
        Arg::Blob(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(data: Vec<u8>) -> Self {
        Arg::Blob(Bytes::from(data))
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Integer(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Arg::Integer(n as i64)
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Arg::Integer(n as i64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Double(value)
    }
}
