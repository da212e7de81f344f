//! Multiplexed Connection
//!
//! One [`Connection`] is one TCP socket shared by any number of callers.
//! Callers never touch the socket: they build a [`Message`], hand it to the
//! connection and get a [`Completion`] back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  caller threads / tasks                                     │
//! │   execute_int(..)   execute_string(..)   transaction()      │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ enqueue (high lane or standard lane)
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 DualPriorityQueue<Arc<Message>>             │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!        ┌───────────────┴───────────────┐
//!        ▼                               │
//! ┌──────────────┐   sent ledger  ┌──────┴───────┐
//! │ outgoing pump│ ─────────────> │ incoming pump│ ──> completions
//! │  (thread)    │     (FIFO)     │   (thread)   │
//! └──────┬───────┘                └──────▲───────┘
//!        │ write                         │ read
//!        └──────────────> socket ────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `New -> Opening -> Open -> Closing -> Closed`. `open` connects, starts the
//! pumps and waits for a timed `PING` (preceded by `AUTH` when a password is
//! configured). Any fatal error moves the connection straight to `Closed`
//! and fails every outstanding message.
//!
//! ## Example
//!
//! ```ignore
//! use flashkv_client::{Commands, Connection, ConnectionConfig};
//!
//! let conn = Connection::connect(ConnectionConfig::default()).await?;
//! conn.set(0, "name", "Ariz");
//! let name = conn.get_string(0, "name").await?;
//! ```

pub mod config;
pub(crate) mod pump;
mod stats;
pub mod transaction;

pub use config::ConnectionConfig;
pub(crate) use stats::ConnectionStats;
pub use stats::Counters;
pub use transaction::Transaction;

use crate::completion::{block_with_timeout, Completion, Pending};
use crate::error::{RedisError, Result};
use crate::message::Message;
use crate::protocol::{Literal, Reply};
use bytes::Bytes;
use pump::Shared;
use std::future::poll_fn;
use std::net::TcpStream;
use std::sync::Arc;
use std::task::Poll;
use std::thread;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Opening,
    Open,
    Closing,
    Closed,
}

/// An error observed on the connection.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub error: RedisError,
    /// What the connection was doing, or which command failed
    pub cause: String,
    /// True if the connection was torn down
    pub is_fatal: bool,
}

/// Anything commands can be submitted to: a connection or a transaction.
///
/// Implementors only provide `enqueue`; the per-shape helpers wire a typed
/// completion to the message and submit it.
pub trait Executor {
    /// Submits a message. High-priority messages jump the standard queue.
    fn enqueue(&self, message: Arc<Message>, high_priority: bool) -> Result<()>;

    /// Submits `message` and returns a completion that resolves to
    /// `extract(reply)`.
    fn execute_with_priority<T: Send + 'static>(
        &self,
        message: Message,
        high_priority: bool,
        extract: fn(Reply) -> Result<T>,
    ) -> Completion<T> {
        let (mut completion, completer) = Completion::pair(extract);
        if let Err(err) = message.set_completion(Box::new(completer)) {
            return Completion::ready(Err(err));
        }
        let message = Arc::new(message);
        completion.attach(&message);
        if let Err(err) = self.enqueue(Arc::clone(&message), high_priority) {
            message.fail(err);
        }
        completion
    }

    fn execute_with<T: Send + 'static>(
        &self,
        message: Message,
        extract: fn(Reply) -> Result<T>,
    ) -> Completion<T> {
        self.execute_with_priority(message, false, extract)
    }

    fn execute_bool(&self, message: Message) -> Completion<bool> {
        self.execute_with(message, Reply::into_bool)
    }

    fn execute_int(&self, message: Message) -> Completion<i64> {
        self.execute_with(message, Reply::into_i64)
    }

    fn execute_double(&self, message: Message) -> Completion<f64> {
        self.execute_with(message, Reply::into_f64)
    }

    fn execute_string(&self, message: Message) -> Completion<Option<String>> {
        self.execute_with(message, Reply::into_string)
    }

    fn execute_bytes(&self, message: Message) -> Completion<Option<Bytes>> {
        self.execute_with(message, Reply::into_bytes)
    }

    fn execute_strings(&self, message: Message) -> Completion<Vec<Option<String>>> {
        self.execute_with(message, Reply::into_strings)
    }

    fn execute_multi_bytes(&self, message: Message) -> Completion<Vec<Option<Bytes>>> {
        self.execute_with(message, Reply::into_multi_bytes)
    }

    fn execute_pairs(&self, message: Message) -> Completion<Vec<(Bytes, f64)>> {
        self.execute_with(message, Reply::into_pairs)
    }

    fn execute_void(&self, message: Message) -> Completion<()> {
        self.execute_with(message, Reply::into_unit)
    }

    fn execute_reply(&self, message: Message) -> Completion<Reply> {
        self.execute_with(message, Reply::into_reply)
    }
}

struct Inner {
    shared: Arc<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // last handle gone: drain what is queued, then QUIT
        self.shared.close(false);
    }
}

/// A multiplexed connection. Cloning shares the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates an unopened connection. Messages submitted before `open` are
    /// held in the queue and sent once the handshake is under way.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared::new(config)),
            }),
        }
    }

    /// Creates and opens a connection.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let connection = Self::new(config);
        connection.open().await?;
        Ok(connection)
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Connects, starts the pumps and completes the handshake.
    ///
    /// Only valid on a `New` connection. On failure the connection is closed.
    pub async fn open(&self) -> Result<()> {
        let shared = self.shared();
        if !shared.transition(&[ConnectionState::New], ConnectionState::Opening) {
            return Err(RedisError::InvalidState(
                "the connection has already been opened",
            ));
        }
        info!(server = %shared.address, "Connecting");

        let stream = match self.connect_socket().await {
            Ok(stream) => stream,
            Err(err) => {
                shared.shutdown("connect failed", Some(err.clone()));
                return Err(err);
            }
        };

        let ping = match self.start(stream) {
            Ok(ping) => ping,
            Err(err) => {
                shared.shutdown("failed to start the connection", Some(err.clone()));
                return Err(err);
            }
        };

        match tokio::time::timeout(shared.config.sync_timeout, ping).await {
            Ok(Ok(ping_ms)) => {
                if !shared.transition(&[ConnectionState::Opening], ConnectionState::Open) {
                    // closed while the handshake was in flight
                    return Err(RedisError::InvalidState(
                        "the connection was closed during the handshake",
                    ));
                }
                info!(server = %shared.address, ping_ms, "Connection open");
                Ok(())
            }
            Ok(Err(err)) => {
                shared.shutdown("handshake failed", Some(err.clone()));
                Err(err)
            }
            Err(_) => {
                let err = shared.timeout_error();
                shared.shutdown("handshake timed out", Some(err.clone()));
                Err(err)
            }
        }
    }

    async fn connect_socket(&self) -> Result<TcpStream> {
        let config = &self.shared().config;
        let connect = tokio::net::TcpStream::connect(self.shared().address.as_str());
        let stream = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| RedisError::Timeout { pending: None })??;
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(config.io_timeout)?;
        Ok(stream)
    }

    /// Queues the handshake and spawns both pumps. Returns the timed ping.
    fn start(&self, stream: TcpStream) -> Result<Completion<i64>> {
        let shared = self.shared();
        let reader = stream.try_clone()?;
        shared.attach_socket(stream.try_clone()?);

        if let Some(password) = &shared.config.password {
            debug!("Authenticating");
            shared.enqueue(Arc::new(Message::auth(password)), true)?;
        }
        let ping = self.execute_with_priority(
            Message::ping().expect(Literal::Pong).critical(),
            true,
            Reply::into_i64,
        );

        // the pumps own their halves of the socket and exit on shutdown
        let outgoing = Arc::clone(shared);
        thread::Builder::new()
            .name("flashkv-outgoing".to_string())
            .spawn(move || pump::run_outgoing(outgoing, stream))?;
        let incoming = Arc::clone(shared);
        thread::Builder::new()
            .name("flashkv-incoming".to_string())
            .spawn(move || pump::run_incoming(incoming, reader))?;
        Ok(ping)
    }

    /// Submits a message without tracking its result.
    pub fn submit(&self, message: Message, high_priority: bool) -> Result<()> {
        self.enqueue(Arc::new(message), high_priority)
    }

    /// Starts a transaction on this connection.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(self.shared()))
    }

    /// Closes the connection.
    ///
    /// Graceful (`abort == false`): queued messages are still sent, followed
    /// by `QUIT`. Abort: queued messages fail with [`RedisError::Aborted`]
    /// and the socket is shut down.
    pub fn close(&self, abort: bool) {
        debug!(server = %self.shared().address, abort, "Closing");
        self.shared().close(abort);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().current_state()
    }

    /// Resolves once the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.shared().state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Subscribes to error events (fatal and per-command).
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.shared().errors.subscribe()
    }

    pub fn counters(&self) -> Counters {
        let shared = self.shared();
        shared
            .stats
            .snapshot(shared.queue.len(), shared.ledger.len())
    }

    /// Messages not yet sent plus messages sent but not yet answered.
    pub fn outstanding_count(&self) -> usize {
        self.shared().queue.len() + self.shared().ledger.len()
    }

    /// Blocks the current thread until `completion` resolves or the sync
    /// timeout passes. A timeout leaves the request running.
    ///
    /// Must not be called from inside an async context; use `wait_async`
    /// there.
    pub fn wait<T>(&self, completion: &mut Completion<T>) -> Result<T> {
        match block_with_timeout(completion, self.shared().config.sync_timeout)? {
            Some(outcome) => outcome,
            None => Err(self.shared().timeout_error()),
        }
    }

    /// Blocks until every item resolves, or the sync timeout passes.
    pub fn wait_all(&self, items: &mut [&mut dyn Pending]) -> Result<()> {
        let all = poll_fn(|cx| {
            let mut ready = true;
            for item in items.iter_mut() {
                ready &= item.poll_complete(cx).is_ready();
            }
            if ready {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });
        match block_with_timeout(all, self.shared().config.sync_timeout)? {
            Some(()) => Ok(()),
            None => Err(self.shared().timeout_error()),
        }
    }

    /// Blocks until any item resolves, returning the index of the first
    /// resolved item.
    pub fn wait_any(&self, items: &mut [&mut dyn Pending]) -> Result<usize> {
        let any = poll_fn(|cx| {
            for (index, item) in items.iter_mut().enumerate() {
                if item.poll_complete(cx).is_ready() {
                    return Poll::Ready(index);
                }
            }
            Poll::Pending
        });
        match block_with_timeout(any, self.shared().config.sync_timeout)? {
            Some(index) => Ok(index),
            None => Err(self.shared().timeout_error()),
        }
    }

    /// Awaits `completion` with the sync timeout.
    pub async fn wait_async<T>(&self, completion: Completion<T>) -> Result<T> {
        match tokio::time::timeout(self.shared().config.sync_timeout, completion).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.shared().timeout_error()),
        }
    }
}

impl Executor for Connection {
    fn enqueue(&self, message: Arc<Message>, high_priority: bool) -> Result<()> {
        self.shared().enqueue(message, high_priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_state() {
        let conn = Connection::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::New);
        assert_eq!(conn.outstanding_count(), 0);
    }

    #[test]
    fn test_messages_wait_in_queue_before_open() {
        let conn = Connection::new(ConnectionConfig::default());
        let _pending = conn.execute_int(Message::new(Literal::Incr).arg("n"));
        assert_eq!(conn.outstanding_count(), 1);
        assert_eq!(conn.counters().unsent_queue, 1);
    }

    #[test]
    fn test_close_before_open_fails_queued() {
        let conn = Connection::new(ConnectionConfig::default());
        let mut pending = conn.execute_int(Message::new(Literal::Incr).arg("n"));
        conn.close(false);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            pending.try_take(),
            Some(Err(RedisError::ConnectionTerminated(_)))
        ));

        let mut rejected = conn.execute_int(Message::new(Literal::Incr).arg("n"));
        assert!(matches!(rejected.try_take(), Some(Err(RedisError::QueueClosed))));
    }

    #[test]
    fn test_wait_times_out_and_counts() {
        let conn = Connection::new(
            ConnectionConfig::default().with_sync_timeout(std::time::Duration::from_millis(20)),
        );
        let mut pending = conn.execute_int(Message::new(Literal::Incr).arg("n"));
        let err = conn.wait(&mut pending).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(conn.counters().timeouts, 1);
    }

    #[tokio::test]
    async fn test_open_twice_is_invalid() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1", 1));
        // first attempt fails to connect, moving the connection to Closed
        assert!(conn.open().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.open().await,
            Err(RedisError::InvalidState(_))
        ));
    }
}
