//! Streaming RESP Reply Parser
//!
//! [`ReplyReader`] pulls reply frames off a blocking byte source (the socket
//! in production, a byte slice in tests and benchmarks) one at a time.
//!
//! ## Design
//!
//! 1. **One fixed read buffer**: bytes are read from the source in chunks of
//!    [`READ_BUFFER_SIZE`] and parsed in place; the buffer is reused for the
//!    whole lifetime of the reader.
//! 2. **No backtracking**: every byte is consumed exactly once, so a frame
//!    that straddles two reads needs no re-parse.
//! 3. **Spill on long lines**: a status / error / length line that runs past
//!    the end of the buffer is accumulated in a growable scratch buffer.
//!
//! ## End of Stream
//!
//! `read_reply` returns `Ok(None)` only when the stream ends cleanly between
//! two frames. An end of stream inside a frame is an error.

use crate::error::Result;
use crate::protocol::types::{prefix, Reply};
use bytes::{Bytes, BytesMut};
use std::io::{ErrorKind, Read};
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The stream ended in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A reply arrived while no request was waiting for one
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Size of the reusable read buffer.
pub const READ_BUFFER_SIZE: usize = 2048;

/// Parses a signed decimal integer byte by byte.
pub fn parse_i64(digits: &[u8]) -> ParseResult<i64> {
    let invalid = || ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned());

    let (negative, body) = match digits.split_first() {
        Some((&b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if body.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &b in body {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = (b - b'0') as i64;
        // accumulate negatively so i64::MIN parses
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub(digit))
            .ok_or_else(invalid)?;
    }
    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or_else(invalid)
    }
}

/// Incremental reply reader over a blocking source.
pub struct ReplyReader<R> {
    source: R,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    /// Holds line fragments that crossed a buffer refill.
    spill: BytesMut,
}

impl<R: Read> ReplyReader<R> {
    /// Creates a reader with the standard buffer size.
    pub fn new(source: R) -> Self {
        Self::with_capacity(source, READ_BUFFER_SIZE)
    }

    /// Creates a reader with a custom buffer size (must be non-zero).
    pub fn with_capacity(source: R, capacity: usize) -> Self {
        Self {
            source,
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            len: 0,
            spill: BytesMut::new(),
        }
    }

    /// Consumes the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Refills the buffer; returns false at end of stream.
    fn fill(&mut self) -> Result<bool> {
        loop {
            match self.source.read(&mut self.buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.pos = 0;
                    self.len = n;
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.pos == self.len && !self.fill()? {
            return Err(ParseError::UnexpectedEof.into());
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads up to (and consumes) the next CRLF, returning the line without it.
    fn read_line(&mut self) -> Result<Bytes> {
        self.spill.clear();
        loop {
            if self.pos == self.len && !self.fill()? {
                return Err(ParseError::UnexpectedEof.into());
            }
            let available = &self.buf[self.pos..self.len];
            match available.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    let line = if self.spill.is_empty() {
                        Bytes::copy_from_slice(&available[..idx])
                    } else {
                        self.spill.extend_from_slice(&available[..idx]);
                        self.spill.split().freeze()
                    };
                    self.pos += idx + 1;
                    return match line.split_last() {
                        Some((&b'\r', _)) => Ok(line.slice(..line.len() - 1)),
                        _ => Err(ParseError::ProtocolError("line not terminated by CRLF".into()).into()),
                    };
                }
                None => {
                    self.spill.extend_from_slice(available);
                    self.pos = self.len;
                }
            }
        }
    }

    fn read_integer_line(&mut self) -> Result<i64> {
        let line = self.read_line()?;
        Ok(parse_i64(&line)?)
    }

    /// Reads exactly `n` payload bytes followed by CRLF.
    fn read_payload(&mut self, n: usize) -> Result<Bytes> {
        // the length header is untrusted; grow as bytes actually arrive
        let mut out = BytesMut::with_capacity(n.min(self.buf.len()));
        while out.len() < n {
            if self.pos == self.len && !self.fill()? {
                return Err(ParseError::UnexpectedEof.into());
            }
            let take = (n - out.len()).min(self.len - self.pos);
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
        }
        if self.read_byte()? != b'\r' || self.read_byte()? != b'\n' {
            return Err(ParseError::ProtocolError("bulk string missing trailing CRLF".into()).into());
        }
        Ok(out.freeze())
    }

    /// Reads the next complete reply.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly before a new frame began.
    pub fn read_reply(&mut self) -> Result<Option<Reply>> {
        if self.pos == self.len && !self.fill()? {
            return Ok(None);
        }
        self.read_value().map(Some)
    }

    fn read_value(&mut self) -> Result<Reply> {
        match self.read_byte()? {
            prefix::SIMPLE_STRING => Ok(Reply::Status(self.read_line()?)),
            prefix::ERROR => {
                let line = self.read_line()?;
                Ok(Reply::Error(String::from_utf8_lossy(&line).into_owned()))
            }
            prefix::INTEGER => Ok(Reply::Integer(self.read_integer_line()?)),
            prefix::BULK_STRING => match self.read_integer_line()? {
                -1 => Ok(Reply::Bulk(None)),
                len if len < 0 => Err(ParseError::InvalidBulkLength(len).into()),
                len => Ok(Reply::Bulk(Some(self.read_payload(len as usize)?))),
            },
            prefix::ARRAY => match self.read_integer_line()? {
                -1 => Ok(Reply::Bulk(None)),
                count if count < 0 => Err(ParseError::InvalidArrayLength(count).into()),
                count => {
                    let mut items = Vec::with_capacity((count as usize).min(1024));
                    for _ in 0..count {
                        items.push(self.read_value()?);
                    }
                    Ok(Reply::Multi(items))
                }
            },
            other => Err(ParseError::UnknownPrefix(other).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RedisError;

    /// A source that hands out one byte per read call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let data: &[u8] = self.0;
            match data.split_first() {
                Some((&b, rest)) if !out.is_empty() => {
                    out[0] = b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    fn parse_one(input: &[u8]) -> Reply {
        ReplyReader::new(input).read_reply().unwrap().unwrap()
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_one(b"+OK\r\n"), Reply::status("OK"));
    }

    #[test]
    fn test_parse_error() {
        assert_eq!(
            parse_one(b"-ERR unknown command\r\n"),
            Reply::error("ERR unknown command")
        );
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_one(b":1000\r\n"), Reply::Integer(1000));
        assert_eq!(parse_one(b":-42\r\n"), Reply::Integer(-42));
    }

    #[test]
    fn test_parse_bulk_string() {
        assert_eq!(parse_one(b"$5\r\nhello\r\n"), Reply::bulk("hello"));
    }

    #[test]
    fn test_parse_null_and_empty_bulk() {
        assert_eq!(parse_one(b"$-1\r\n"), Reply::null());
        assert_eq!(parse_one(b"$0\r\n\r\n"), Reply::bulk(""));
        assert_eq!(parse_one(b"*-1\r\n"), Reply::null());
    }

    #[test]
    fn test_parse_nested_array() {
        let reply = parse_one(b"*3\r\n:1\r\n*2\r\n+OK\r\n$-1\r\n$3\r\nabc\r\n");
        assert_eq!(
            reply,
            Reply::Multi(vec![
                Reply::Integer(1),
                Reply::Multi(vec![Reply::status("OK"), Reply::null()]),
                Reply::bulk("abc"),
            ])
        );
    }

    #[test]
    fn test_parse_empty_array() {
        assert_eq!(parse_one(b"*0\r\n"), Reply::Multi(vec![]));
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        assert_eq!(
            parse_one(b"$7\r\nhe\r\nl\x00o\r\n"),
            Reply::bulk(&b"he\r\nl\x00o"[..])
        );
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let input = b"+OK\r\n$5\r\nhello\r\n*2\r\n:7\r\n-ERR x\r\n";
        let mut reader = ReplyReader::with_capacity(Trickle(input), 1);
        assert_eq!(reader.read_reply().unwrap(), Some(Reply::status("OK")));
        assert_eq!(reader.read_reply().unwrap(), Some(Reply::bulk("hello")));
        assert_eq!(
            reader.read_reply().unwrap(),
            Some(Reply::Multi(vec![Reply::Integer(7), Reply::error("ERR x")]))
        );
        assert_eq!(reader.read_reply().unwrap(), None);
    }

    #[test]
    fn test_long_line_spills_past_buffer() {
        let status = "S".repeat(5000);
        let input = format!("+{}\r\n:1\r\n", status);
        let mut reader = ReplyReader::new(input.as_bytes());
        assert_eq!(
            reader.read_reply().unwrap(),
            Some(Reply::status(status.into_bytes()))
        );
        assert_eq!(reader.read_reply().unwrap(), Some(Reply::Integer(1)));
    }

    #[test]
    fn test_crlf_split_across_refill() {
        let mut reader = ReplyReader::with_capacity(Trickle(b"+PONG\r\n"), 4);
        assert_eq!(reader.read_reply().unwrap(), Some(Reply::status("PONG")));
    }

    #[test]
    fn test_large_bulk_payload() {
        let payload = vec![b'x'; 10_000];
        let mut input = format!("${}\r\n", payload.len()).into_bytes();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\n");
        assert_eq!(parse_one(&input), Reply::bulk(payload));
    }

    #[test]
    fn test_clean_eof_between_frames() {
        let mut reader = ReplyReader::new(&b""[..]);
        assert_eq!(reader.read_reply().unwrap(), None);
    }

    #[test]
    fn test_eof_mid_frame_is_error() {
        let mut reader = ReplyReader::new(&b"$5\r\nhel"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::UnexpectedEof))
        ));

        let mut reader = ReplyReader::new(&b"*2\r\n:1\r\n"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::UnexpectedEof))
        ));
    }

    #[test]
    fn test_oversized_length_header_hits_eof() {
        // a terabyte header followed by three bytes must not reserve a terabyte
        let mut reader = ReplyReader::new(&b"$1099511627776\r\nabc"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::UnexpectedEof))
        ));
    }

    #[test]
    fn test_unknown_prefix() {
        let mut reader = ReplyReader::new(&b"@oops\r\n"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::UnknownPrefix(b'@')))
        ));
    }

    #[test]
    fn test_missing_bulk_terminator() {
        let mut reader = ReplyReader::new(&b"$3\r\nabcXY"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::ProtocolError(_)))
        ));
    }

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64(b"0"), Ok(0));
        assert_eq!(parse_i64(b"-17"), Ok(-17));
        assert_eq!(parse_i64(b"9223372036854775807"), Ok(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Ok(i64::MIN));
        assert!(parse_i64(b"9223372036854775808").is_err());
        assert!(parse_i64(b"").is_err());
        assert!(parse_i64(b"-").is_err());
        assert!(parse_i64(b"12a").is_err());
    }

    #[test]
    fn test_invalid_integer_frame() {
        let mut reader = ReplyReader::new(&b":not_a_number\r\n"[..]);
        assert!(matches!(
            reader.read_reply(),
            Err(RedisError::Protocol(ParseError::InvalidInteger(_)))
        ));
    }
}
