//! Command Name Literals
//!
//! Command names and fixed acknowledgments are dense enum values backed by a
//! single static table of their wire bytes, so writing a command name never
//! allocates.

use std::fmt;

macro_rules! literals {
    ($($variant:ident => $text:literal,)+) => {
        /// A command name, keyword argument or fixed reply literal.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Literal {
            $($variant,)+
        }

        static TABLE: &[&[u8]] = &[$($text.as_bytes(),)+];

        impl Literal {
            /// Every literal in declaration order.
            pub const ALL: &'static [Literal] = &[$(Literal::$variant,)+];
        }
    };
}

literals! {
    // fixed replies
    Ok => "OK",
    Queued => "QUEUED",
    Pong => "PONG",
    // connection / server
    Auth => "AUTH",
    Ping => "PING",
    Quit => "QUIT",
    Select => "SELECT",
    Info => "INFO",
    Echo => "ECHO",
    Debug => "DEBUG",
    DbSize => "DBSIZE",
    FlushDb => "FLUSHDB",
    FlushAll => "FLUSHALL",
    // transactions
    Multi => "MULTI",
    Exec => "EXEC",
    Discard => "DISCARD",
    Watch => "WATCH",
    Unwatch => "UNWATCH",
    // keys and strings
    Del => "DEL",
    Exists => "EXISTS",
    Expire => "EXPIRE",
    Persist => "PERSIST",
    Ttl => "TTL",
    Type => "TYPE",
    Keys => "KEYS",
    Rename => "RENAME",
    Get => "GET",
    Set => "SET",
    SetEx => "SETEX",
    SetNx => "SETNX",
    GetSet => "GETSET",
    Append => "APPEND",
    StrLen => "STRLEN",
    Incr => "INCR",
    IncrBy => "INCRBY",
    Decr => "DECR",
    DecrBy => "DECRBY",
    MGet => "MGET",
    MSet => "MSET",
    // lists
    LPush => "LPUSH",
    RPush => "RPUSH",
    LPop => "LPOP",
    RPop => "RPOP",
    LLen => "LLEN",
    LRange => "LRANGE",
    // hashes
    HGet => "HGET",
    HSet => "HSET",
    HDel => "HDEL",
    HGetAll => "HGETALL",
    HIncrBy => "HINCRBY",
    // sets
    SAdd => "SADD",
    SRem => "SREM",
    SMembers => "SMEMBERS",
    SIsMember => "SISMEMBER",
    // sorted sets
    ZAdd => "ZADD",
    ZIncrBy => "ZINCRBY",
    ZScore => "ZSCORE",
    ZRange => "ZRANGE",
    ZRevRange => "ZREVRANGE",
    ZRangeByScore => "ZRANGEBYSCORE",
    ZCard => "ZCARD",
    // pub/sub
    Publish => "PUBLISH",
    // keywords
    WithScores => "WITHSCORES",
    Sleep => "SLEEP",
}

impl Literal {
    /// The wire bytes of this literal.
    #[inline]
    pub fn as_bytes(self) -> &'static [u8] {
        TABLE[self as usize]
    }

    /// The literal as text. Every entry in the table is ASCII.
    pub fn as_str(self) -> &'static str {
        std::str::from_utf8(self.as_bytes()).unwrap_or("?")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
