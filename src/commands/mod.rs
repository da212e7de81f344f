//! Typed Commands
//!
//! A small typed layer over [`Executor`]. Each method builds one [`Message`]
//! and picks the completion shape; nothing here touches the wire directly.
//!
//! The trait is implemented for every executor, so the same calls work on a
//! [`Connection`](crate::Connection) and inside a
//! [`Transaction`](crate::Transaction):
//!
//! ```ignore
//! let tx = conn.transaction();
//! let a = tx.set(0, "a", "1");
//! let n = tx.increment(0, "a");
//! tx.execute().await?;
//! assert_eq!(n.await?, 2);
//! ```
//!
//! ## Supported Commands
//!
//! ### Connection
//! - `PING`, `INFO`
//!
//! ### Keys and Strings
//! - `GET`, `SET`, `SETEX`, `DEL`, `EXISTS`
//! - `INCR`, `INCRBY`, `APPEND`
//!
//! ### Lists, Hashes, Sorted Sets
//! - `RPUSH`, `LRANGE`
//! - `HGET`, `HSET`
//! - `ZADD`, `ZRANGEBYSCORE ... WITHSCORES`

use crate::completion::Completion;
use crate::connection::Executor;
use crate::message::{Arg, Message};
use crate::protocol::{Literal, Reply};
use bytes::Bytes;

/// Typed command helpers for any [`Executor`].
pub trait Commands: Executor {
    /// Round trip to the server, resolving to milliseconds.
    fn ping(&self) -> Completion<i64> {
        self.execute_with(Message::ping().expect(Literal::Pong), Reply::into_i64)
    }

    /// Raw `INFO` text.
    fn info(&self) -> Completion<Option<String>> {
        self.execute_string(Message::new(Literal::Info))
    }

    fn get(&self, db: u32, key: impl Into<Arg>) -> Completion<Option<Bytes>> {
        self.execute_bytes(Message::new(Literal::Get).db(db).arg(key))
    }

    fn get_string(&self, db: u32, key: impl Into<Arg>) -> Completion<Option<String>> {
        self.execute_string(Message::new(Literal::Get).db(db).arg(key))
    }

    fn set(&self, db: u32, key: impl Into<Arg>, value: impl Into<Arg>) -> Completion<()> {
        self.execute_void(
            Message::new(Literal::Set)
                .db(db)
                .arg(key)
                .arg(value)
                .expect(Literal::Ok),
        )
    }

    fn set_with_expiry(
        &self,
        db: u32,
        key: impl Into<Arg>,
        seconds: i64,
        value: impl Into<Arg>,
    ) -> Completion<()> {
        self.execute_void(
            Message::new(Literal::SetEx)
                .db(db)
                .arg(key)
                .arg(seconds)
                .arg(value)
                .expect(Literal::Ok),
        )
    }

    /// Deletes a key; true if it existed.
    fn remove(&self, db: u32, key: impl Into<Arg>) -> Completion<bool> {
        self.execute_bool(Message::new(Literal::Del).db(db).arg(key))
    }

    fn exists(&self, db: u32, key: impl Into<Arg>) -> Completion<bool> {
        self.execute_bool(Message::new(Literal::Exists).db(db).arg(key))
    }

    fn increment(&self, db: u32, key: impl Into<Arg>) -> Completion<i64> {
        self.execute_int(Message::new(Literal::Incr).db(db).arg(key))
    }

    fn increment_by(&self, db: u32, key: impl Into<Arg>, by: i64) -> Completion<i64> {
        self.execute_int(Message::new(Literal::IncrBy).db(db).arg(key).arg(by))
    }

    /// Appends to a string value, resolving to the new length.
    fn append(&self, db: u32, key: impl Into<Arg>, value: impl Into<Arg>) -> Completion<i64> {
        self.execute_int(Message::new(Literal::Append).db(db).arg(key).arg(value))
    }

    /// Pushes to the tail of a list, resolving to the new length.
    fn list_push(&self, db: u32, key: impl Into<Arg>, value: impl Into<Arg>) -> Completion<i64> {
        self.execute_int(Message::new(Literal::RPush).db(db).arg(key).arg(value))
    }

    fn list_range(
        &self,
        db: u32,
        key: impl Into<Arg>,
        start: i64,
        stop: i64,
    ) -> Completion<Vec<Option<String>>> {
        self.execute_strings(
            Message::new(Literal::LRange)
                .db(db)
                .arg(key)
                .arg(start)
                .arg(stop),
        )
    }

    fn hash_get(&self, db: u32, key: impl Into<Arg>, field: impl Into<Arg>) -> Completion<Option<Bytes>> {
        self.execute_bytes(Message::new(Literal::HGet).db(db).arg(key).arg(field))
    }

    /// Sets a hash field; true if the field is new.
    fn hash_set(
        &self,
        db: u32,
        key: impl Into<Arg>,
        field: impl Into<Arg>,
        value: impl Into<Arg>,
    ) -> Completion<bool> {
        self.execute_bool(
            Message::new(Literal::HSet)
                .db(db)
                .arg(key)
                .arg(field)
                .arg(value),
        )
    }

    /// Adds a sorted-set member; true if it is new.
    fn sorted_set_add(
        &self,
        db: u32,
        key: impl Into<Arg>,
        member: impl Into<Arg>,
        score: f64,
    ) -> Completion<bool> {
        self.execute_bool(
            Message::new(Literal::ZAdd)
                .db(db)
                .arg(key)
                .arg(score)
                .arg(member),
        )
    }

    /// Members with scores between `min` and `max`. Use [`Arg::exclusive`]
    /// for open bounds.
    fn sorted_set_range_by_score(
        &self,
        db: u32,
        key: impl Into<Arg>,
        min: impl Into<Arg>,
        max: impl Into<Arg>,
    ) -> Completion<Vec<(Bytes, f64)>> {
        self.execute_pairs(
            Message::new(Literal::ZRangeByScore)
                .db(db)
                .arg(key)
                .arg(min)
                .arg(max)
                .arg(Literal::WithScores),
        )
    }
}

impl<E: Executor + ?Sized> Commands for E {}
