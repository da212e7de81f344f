//! Command Framing
//!
//! Every command goes on the wire as an array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! ```
//!
//! Numbers are written as bulk strings too. A native `:` integer frame is
//! only valid as a top-level reply, never as an element of a request.

use crate::protocol::types::{prefix, CRLF};
use bytes::{BufMut, BytesMut};

/// Integers 0..=99 go through a table-free fast path.
const FAST_PATH_MAX: i64 = 99;

/// Formats `value` into the tail of `scratch` and returns the written digits.
fn format_i64(value: i64, scratch: &mut [u8; 20]) -> &[u8] {
    let negative = value < 0;
    let mut n = value.unsigned_abs();
    let mut pos = scratch.len();
    loop {
        pos -= 1;
        scratch[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        scratch[pos] = b'-';
    }
    &scratch[pos..]
}

/// Writes a RESP length line such as `*3\r\n` or `$5\r\n`.
fn write_length(buf: &mut BytesMut, kind: u8, len: usize) {
    buf.put_u8(kind);
    if len < 10 {
        buf.put_u8(b'0' + len as u8);
    } else {
        let mut scratch = [0u8; 20];
        buf.put_slice(format_i64(len as i64, &mut scratch));
    }
    buf.put_slice(CRLF);
}

/// Writes the array header for a command with `arg_count` arguments
/// (the command name itself is counted here).
pub fn write_command_header(buf: &mut BytesMut, arg_count: usize) {
    write_length(buf, prefix::ARRAY, arg_count + 1);
}

/// Writes one bulk string.
pub fn write_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.reserve(data.len() + 16);
    write_length(buf, prefix::BULK_STRING, data.len());
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

/// Writes an integer argument in bulk form.
pub fn write_integer(buf: &mut BytesMut, value: i64) {
    if (0..=FAST_PATH_MAX).contains(&value) {
        if value < 10 {
            buf.put_slice(b"$1\r\n");
            buf.put_u8(b'0' + value as u8);
        } else {
            buf.put_slice(b"$2\r\n");
            buf.put_u8(b'0' + (value / 10) as u8);
            buf.put_u8(b'0' + (value % 10) as u8);
        }
        buf.put_slice(CRLF);
        return;
    }
    let mut scratch = [0u8; 20];
    write_bulk(buf, format_i64(value, &mut scratch));
}

/// Renders a double the way it is sent to the server.
///
/// Whole values inside the 32-bit range use the integer form; everything else
/// uses the shortest decimal that round-trips.
pub fn format_double(value: f64) -> String {
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        return (value as i64).to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let magnitude = value.abs();
    if magnitude >= 1e16 || (magnitude != 0.0 && magnitude < 1e-5) {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

/// Writes a double argument in bulk form.
pub fn write_double(buf: &mut BytesMut, value: f64) {
    if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
        write_integer(buf, value as i64);
    } else {
        write_bulk(buf, format_double(value).as_bytes());
    }
}
