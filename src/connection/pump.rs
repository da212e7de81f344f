//! Outbound and Inbound Pumps
//!
//! Each open connection runs exactly two background threads:
//!
//! ```text
//!                 ┌──────────────────────┐
//!   callers ────> │  DualPriorityQueue   │
//!                 └──────────┬───────────┘
//!                            │ try_dequeue()
//!                            ▼
//!                 ┌──────────────────────┐  write + flush   ┌────────┐
//!                 │   outgoing pump      │ ───────────────> │        │
//!                 └──────────┬───────────┘                  │        │
//!                            │ push (before the write)      │ socket │
//!                            ▼                              │        │
//!                 ┌──────────────────────┐                  │        │
//!                 │     sent ledger      │                  │        │
//!                 └──────────┬───────────┘                  │        │
//!                            │ pop (one per reply)          │        │
//!                 ┌──────────┴───────────┐    read_reply    │        │
//!                 │   incoming pump      │ <─────────────── │        │
//!                 └──────────────────────┘                  └────────┘
//! ```
//!
//! The socket is written only by the outgoing pump and read only by the
//! incoming pump. The transport carries no request ids, so the sent ledger's
//! FIFO order is the only thing that pairs a reply with its request.

use crate::connection::transaction::ExecSink;
use crate::connection::{ConnectionConfig, ConnectionState, ConnectionStats, ErrorEvent};
use crate::error::{RedisError, Result};
use crate::message::Message;
use crate::protocol::{Literal, ParseError, Reply, ReplyReader};
use crate::queue::{Closed, DualPriorityQueue};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

/// Initial capacity of the outgoing write buffer
const WRITE_BUFFER_SIZE: usize = 4096;

struct LedgerState {
    sent: VecDeque<Arc<Message>>,
    closed: bool,
}

/// FIFO of messages written to the socket and still waiting for a reply.
pub(crate) struct SentLedger {
    state: Mutex<LedgerState>,
}

impl SentLedger {
    fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                sent: VecDeque::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a message about to be written. Fails once the connection has
    /// shut down, so nothing can be stranded in a drained ledger.
    pub fn push(&self, message: Arc<Message>) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(RedisError::ConnectionTerminated(
                "the connection has shut down".to_string(),
            ));
        }
        state.sent.push_back(message);
        Ok(())
    }

    pub fn pop(&self) -> Option<Arc<Message>> {
        self.lock().sent.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describes the oldest unanswered message, e.g. `0: GET`.
    pub fn oldest(&self) -> Option<String> {
        self.lock().sent.front().map(|m| m.to_string())
    }

    fn close_and_drain(&self) -> Vec<Arc<Message>> {
        let mut state = self.lock();
        state.closed = true;
        state.sent.drain(..).collect()
    }
}

/// State shared by the connection handle, both pumps and transactions.
pub(crate) struct Shared {
    pub config: ConnectionConfig,
    pub address: String,
    pub queue: DualPriorityQueue<Arc<Message>>,
    pub ledger: SentLedger,
    pub stats: ConnectionStats,
    pub state: watch::Sender<ConnectionState>,
    pub errors: broadcast::Sender<ErrorEvent>,
    aborting: AtomicBool,
    shut_down: AtomicBool,
    /// Handle used only to shut the socket down from any thread.
    socket: Mutex<Option<TcpStream>>,
}

impl Shared {
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        let (errors, _) = broadcast::channel(config.error_channel_capacity.max(1));
        Self {
            address: config.address(),
            queue: DualPriorityQueue::new(config.max_unsent),
            ledger: SentLedger::new(),
            stats: ConnectionStats::new(),
            state,
            errors,
            aborting: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            socket: Mutex::new(None),
            config,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves to `to` if the current state is one of `from`.
    pub fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::Acquire)
    }

    pub fn attach_socket(&self, socket: TcpStream) {
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket);
    }

    pub fn enqueue(&self, message: Arc<Message>, high_priority: bool) -> Result<()> {
        self.queue
            .enqueue(message, high_priority)
            .map_err(|Closed(_)| RedisError::QueueClosed)
    }

    /// Builds a timeout error carrying the oldest unanswered request.
    pub fn timeout_error(&self) -> RedisError {
        self.stats.timeout();
        RedisError::Timeout {
            pending: self.ledger.oldest(),
        }
    }

    /// Publishes an error event, or logs it when nobody is listening.
    pub fn emit_error(&self, error: RedisError, cause: &str, is_fatal: bool) {
        if self.errors.receiver_count() == 0 {
            warn!(server = %self.address, cause, is_fatal, error = %error, "Unobserved connection error");
            return;
        }
        let _ = self.errors.send(ErrorEvent {
            error,
            cause: cause.to_string(),
            is_fatal,
        });
    }

    /// Stops taking new work.
    ///
    /// Graceful: the outgoing pump sends what is queued, then `QUIT`.
    /// Abort: the outgoing pump fails what is queued, then shuts down.
    pub fn close(&self, abort: bool) {
        if abort {
            self.aborting.store(true, Ordering::Release);
        }
        match self.current_state() {
            ConnectionState::New => self.shutdown("closed before opening", None),
            ConnectionState::Opening | ConnectionState::Open => {
                self.transition(
                    &[ConnectionState::Opening, ConnectionState::Open],
                    ConnectionState::Closing,
                );
                self.queue.close();
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                if abort {
                    self.queue.close();
                }
            }
        }
    }

    /// Tears the connection down. Only the first call has any effect.
    ///
    /// Every message still in the sent ledger or the outbound queue is failed
    /// with [`RedisError::ConnectionTerminated`].
    pub fn shutdown(&self, cause: &str, error: Option<RedisError>) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.aborting.store(true, Ordering::Release);
        self.queue.close();
        if let Some(socket) = self.socket.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.state.send_replace(ConnectionState::Closed);

        match error {
            Some(error) => {
                warn!(server = %self.address, cause, error = %error, "Connection failed");
                self.emit_error(error, cause, true);
            }
            None => info!(server = %self.address, cause, "Connection closed"),
        }

        let terminated = RedisError::ConnectionTerminated(cause.to_string());
        let unanswered = self.ledger.close_and_drain();
        let unsent = self.queue.dequeue_all();
        if !unanswered.is_empty() || !unsent.is_empty() {
            debug!(
                unanswered = unanswered.len(),
                unsent = unsent.len(),
                "Failing outstanding messages"
            );
        }
        for message in unanswered.into_iter().chain(unsent) {
            message.fail(terminated.clone());
        }
    }
}

/// Body of the `flashkv-outgoing` thread.
pub(crate) fn run_outgoing(shared: Arc<Shared>, stream: TcpStream) {
    info!(server = %shared.address, "Outgoing pump started");
    let mut writer = Writer {
        shared: Arc::clone(&shared),
        stream,
        buffer: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
        current_db: Some(0),
    };
    if let Err(err) = writer.run() {
        shared.shutdown("error writing to the connection", Some(err));
    }
    info!(server = %shared.address, "Outgoing pump exited");
}

struct Writer {
    shared: Arc<Shared>,
    stream: TcpStream,
    buffer: BytesMut,
    /// `None` when the server's selected database is not known.
    current_db: Option<u32>,
}

impl Writer {
    fn run(&mut self) -> Result<()> {
        while let Some((message, jumped)) = self.shared.queue.try_dequeue(false) {
            if self.shared.is_aborting() {
                message.fail(RedisError::Aborted);
                continue;
            }
            if !message.try_mark_sent() {
                self.shared.stats.message_cancelled();
                debug!(command = %message, "Skipping cancelled message");
                continue;
            }
            if jumped {
                self.shared.stats.queue_jumper();
            }
            if message.members().is_some() {
                self.write_batch(&message)?;
            } else {
                self.write_message(message)?;
            }
            self.flush()?;
        }

        if self.shared.is_aborting() {
            self.shared.shutdown("connection aborted", None);
            return Ok(());
        }
        self.shared.transition(
            &[ConnectionState::Opening, ConnectionState::Open],
            ConnectionState::Closing,
        );
        let quit = Arc::new(Message::quit());
        quit.try_mark_sent();
        self.push(quit)?;
        self.flush()
    }

    /// Records `message` in the sent ledger and frames it into the buffer.
    fn push(&mut self, message: Arc<Message>) -> Result<()> {
        if let Err(err) = self.shared.ledger.push(Arc::clone(&message)) {
            message.fail(err.clone());
            return Err(err);
        }
        message.encode(&mut self.buffer);
        self.shared.stats.message_sent();
        trace!(command = %message, "Message queued for write");
        Ok(())
    }

    fn write_message(&mut self, message: Arc<Message>) -> Result<()> {
        if message.is_select() {
            // a caller's SELECT is the switch itself
            debug!(db = ?message.target_db(), "Database selected by caller");
            self.current_db = message.target_db();
            return self.push(message);
        }
        if let Some(db) = message.target_db() {
            if self.current_db != Some(db) {
                debug!(db, "Switching database");
                let select = Arc::new(Message::select(db));
                select.try_mark_sent();
                self.push(select)?;
                self.current_db = Some(db);
            }
            self.shared.stats.db_used(db);
        }
        self.push(message)
    }

    /// Expands a transaction into MULTI, one queued envelope per member (plus
    /// any database switch), and EXEC.
    fn write_batch(&mut self, batch: &Arc<Message>) -> Result<()> {
        let members = batch.members().unwrap_or_default();
        let done = batch.take_sink();

        let multi = Arc::new(Message::new(Literal::Multi).expect(Literal::Ok).critical());
        multi.try_mark_sent();
        self.push(multi)?;

        let mut slots = Vec::with_capacity(members.len());
        let mut db = self.current_db;
        let mut switched = false;
        for member in members {
            if !member.try_mark_sent() {
                self.shared.stats.message_cancelled();
                continue;
            }
            if let Some(target) = member.target_db() {
                if db != Some(target) && !member.is_select() {
                    let select = Arc::new(Message::queued(Arc::new(Message::select(target))));
                    select.try_mark_sent();
                    self.push(select)?;
                    slots.push(None);
                }
                if db != Some(target) {
                    db = Some(target);
                    switched = true;
                }
                self.shared.stats.db_used(target);
            }
            let envelope = Arc::new(Message::queued(Arc::clone(member)));
            envelope.try_mark_sent();
            self.push(envelope)?;
            slots.push(Some(Arc::clone(member)));
        }

        let queued = slots.len();
        let exec = Message::new(Literal::Exec);
        exec.set_completion(Box::new(ExecSink::new(
            Arc::downgrade(&self.shared),
            slots,
            done,
        )))?;
        let exec = Arc::new(exec);
        exec.try_mark_sent();
        self.push(exec)?;

        if switched {
            // SELECT inside MULTI only takes effect if EXEC runs
            self.current_db = None;
        }
        debug!(commands = queued, "Transaction block written");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.buffer)?;
        self.stream.flush()?;
        trace!(bytes = self.buffer.len(), "Flushed");
        self.buffer.clear();
        Ok(())
    }
}

/// Body of the `flashkv-incoming` thread.
pub(crate) fn run_incoming(shared: Arc<Shared>, stream: TcpStream) {
    info!(server = %shared.address, "Incoming pump started");
    let mut reader = ReplyReader::new(stream);
    loop {
        match reader.read_reply() {
            Ok(Some(reply)) => {
                if let Err(err) = process_reply(&shared, reply) {
                    let cause = match err {
                        RedisError::CriticalFailure { .. } => "a critical command failed",
                        _ => "protocol error",
                    };
                    shared.shutdown(cause, Some(err));
                    break;
                }
            }
            Ok(None) => {
                if shared.ledger.is_empty() {
                    shared.shutdown("the server closed the connection", None);
                } else {
                    shared.shutdown(
                        "the server closed the connection",
                        Some(RedisError::ConnectionTerminated(
                            "end of stream with requests pending".to_string(),
                        )),
                    );
                }
                break;
            }
            Err(err) => {
                shared.shutdown("error reading from the connection", Some(err));
                break;
            }
        }
    }
    info!(server = %shared.address, "Incoming pump exited");
}

/// Matches one reply with the oldest sent message and completes it.
///
/// An `Err` return is fatal for the connection.
pub(crate) fn process_reply(shared: &Shared, reply: Reply) -> Result<()> {
    let message = shared
        .ledger
        .pop()
        .ok_or_else(|| ParseError::UnexpectedReply(reply.to_string()))?;
    shared.stats.message_received();
    trace!(command = %message, reply = %reply, "Reply received");

    dispatch_reply(shared, &message, reply)
}

/// Applies `message`'s expectation to `reply` and completes it.
///
/// Server errors are counted and published. An `Err` return means a
/// critical message failed; the message has already received its error.
pub(crate) fn dispatch_reply(shared: &Shared, message: &Message, reply: Reply) -> Result<()> {
    let reply = match message.expected() {
        Some(literal) => reply.expect_literal(literal),
        None => reply,
    };

    let text = match &reply {
        Reply::Error(text) => text.clone(),
        _ => {
            message.complete(reply);
            return Ok(());
        }
    };

    if message.is_critical() {
        message.complete(reply);
        return Err(RedisError::CriticalFailure {
            command: message.to_string(),
            message: text,
        });
    }

    shared.stats.error_message();
    message.complete(reply);
    debug!(command = %message, error = %text, "Server error");
    shared.emit_error(RedisError::Server(text), &message.to_string(), false);
    Ok(())
}
