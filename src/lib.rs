//! # FlashKV Client - A Multiplexed RESP Client Engine
//!
//! `flashkv-client` drives any number of concurrent callers over a single
//! TCP connection to a FlashKV (or any Redis-compatible) server. Commands are
//! pipelined: callers never wait for each other, and replies are matched to
//! requests purely by order.
//!
//! ## Features
//!
//! - **Multiplexed**: One socket, many callers, no per-request round trip
//! - **Two Priorities**: High-priority messages bypass the standard queue
//! - **Transactions**: `MULTI`/`EXEC` blocks written as one uninterrupted unit
//! - **Sync or Async**: Every result is a [`Completion`] you can `.await` or
//!   block on with a timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           flashkv-client                                │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │  Commands   │───>│  Message    │───>│   DualPriorityQueue         │  │
//! │  │ (typed API) │    │ + Completion│    │   high lane │ standard lane │  │
//! │  └─────────────┘    └─────────────┘    └──────────────┬──────────────┘  │
//! │                                                       │                 │
//! │                                                       ▼                 │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────────────┐ │
//! │  │ ReplyReader │<───│   socket     │<───│   Outgoing Pump (thread)    │ │
//! │  │ (RESP)      │    └──────────────┘    │   SELECT / MULTI / EXEC     │ │
//! │  └──────┬──────┘                        └──────────────┬──────────────┘ │
//! │         │            ┌──────────────────────┐          │                │
//! │         └───────────>│  Sent Ledger (FIFO)  │<─────────┘                │
//! │   Incoming Pump      └──────────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashkv_client::{Commands, Connection, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> flashkv_client::Result<()> {
//!     let conn = Connection::connect(ConnectionConfig::new("127.0.0.1", 6379)).await?;
//!
//!     // fire off several commands without waiting in between
//!     let set = conn.set(0, "visits", 10);
//!     let incr = conn.increment(0, "visits");
//!
//!     set.await?;
//!     assert_eq!(incr.await?, 11);
//!
//!     conn.close(false);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP encoding, reply parsing and the reply type
//! - [`message`]: Requests, their arguments and their state machine
//! - [`completion`]: Result handles shared by the caller and the pumps
//! - [`queue`]: The two-lane bounded outbound queue
//! - [`connection`]: Lifecycle, pumps, transactions and counters
//! - [`commands`]: Typed helpers over any executor
//!
//! ## Design Highlights
//!
//! ### Ordered Matching
//!
//! The server answers in request order, so the incoming pump only needs the
//! FIFO of messages that were written. There are no request ids.
//!
//! ### Database Switching
//!
//! Each message names its database. The outgoing pump tracks the selected
//! database and inserts `SELECT` only when it changes.
//!
//! ### Backpressure
//!
//! The standard lane is bounded by `max_unsent`. Producers block when it is
//! full; high-priority messages are never blocked.

pub mod commands;
pub mod completion;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod queue;

// Re-export commonly used types for convenience
pub use commands::Commands;
pub use completion::{Completion, Pending};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, Counters, ErrorEvent, Executor, Transaction,
};
pub use error::{RedisError, Result};
pub use message::{Arg, Message, MessageState};
pub use protocol::{Literal, ParseError, Reply, ReplyReader};
pub use queue::DualPriorityQueue;

/// The default server port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
