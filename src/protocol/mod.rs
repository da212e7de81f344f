//! RESP Protocol Implementation
//!
//! This module implements the client side of the Redis Serialization
//! Protocol (RESP): framing outgoing commands and parsing incoming replies.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe protocol. Requests are always arrays of bulk
//! strings; replies can be any of the five frame types and may nest.
//!
//! ## Modules
//!
//! - `types`: The `Reply` enum and typed extraction
//! - `parser`: Streaming, buffer-reusing reply parser
//! - `encode`: Command framing
//! - `literal`: Static table of command names and fixed replies
//!
//! ## Example
//!
//! ```ignore
//! use flashkv_client::protocol::{encode, Reply, ReplyReader};
//! use bytes::BytesMut;
//!
//! // Framing a request
//! let mut buf = BytesMut::new();
//! encode::write_command_header(&mut buf, 1);
//! encode::write_bulk(&mut buf, b"GET");
//! encode::write_bulk(&mut buf, b"name");
//!
//! // Parsing a reply
//! let mut reader = ReplyReader::new(&b"$4\r\nAriz\r\n"[..]);
//! let reply = reader.read_reply()?.unwrap();
//! assert_eq!(reply, Reply::bulk("Ariz"));
//! ```

pub mod encode;
pub mod literal;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use literal::Literal;
pub use parser::{parse_i64, ParseError, ParseResult, ReplyReader};
pub use types::Reply;
