//! Wire Messages
//!
//! A [`Message`] describes one command: the target database, the command
//! name, its arguments, and what a successful acknowledgment must look like.
//! It also owns the message's place in the send pipeline:
//!
//! ```text
//!              try_mark_sent()            complete() / fail()
//!   NotSent ───────────────────> Sent ─────────────────────────> Complete
//!      │                                                            ▲
//!      └────────────────────── cancel() ────────────────────────────┘
//! ```
//!
//! Transitions out of `NotSent` are compare-and-swap, so a caller cancelling
//! a message races deterministically with the outbound pump picking it up:
//! exactly one of them wins.
//!
//! ## Message Bodies
//!
//! Most messages are plain commands. Three composite bodies change how the
//! message is written or completed:
//!
//! - **Queued**: wraps a command inside MULTI. Writes the wrapped command but
//!   expects `QUEUED`; the wrapped command's own reply arrives later, inside
//!   the EXEC reply.
//! - **Batch**: a whole transaction. The outbound pump expands it into
//!   `MULTI`, one queued envelope per member, and `EXEC`.
//! - **Ping**: replaces a successful reply with round-trip timing.

pub mod arg;

pub use arg::Arg;

use crate::completion::Sink;
use crate::error::{RedisError, Result};
use crate::protocol::encode::{write_bulk, write_command_header};
use crate::protocol::{Literal, Reply};
use bytes::BytesMut;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

/// Where a message is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageState {
    NotSent = 0,
    Sent = 1,
    Complete = 2,
}

impl MessageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageState::NotSent,
            1 => MessageState::Sent,
            _ => MessageState::Complete,
        }
    }
}

pub(crate) enum Body {
    Command,
    Queued(Arc<Message>),
    Batch(Vec<Arc<Message>>),
    Ping,
}

enum SinkSlot {
    Empty,
    Assigned(Box<dyn Sink>),
    Consumed,
}

/// A command descriptor plus its one-shot completion.
pub struct Message {
    db: Option<u32>,
    command: Literal,
    args: SmallVec<[Arg; 4]>,
    expected: Option<Literal>,
    critical: bool,
    body: Body,
    state: AtomicU8,
    sink: Mutex<SinkSlot>,
    created: Instant,
    sent_at: OnceLock<Instant>,
}

impl Message {
    fn with_body(command: Literal, body: Body) -> Self {
        Self {
            db: None,
            command,
            args: SmallVec::new(),
            expected: None,
            critical: false,
            body,
            state: AtomicU8::new(MessageState::NotSent as u8),
            sink: Mutex::new(SinkSlot::Empty),
            created: Instant::now(),
            sent_at: OnceLock::new(),
        }
    }

    /// Creates a command with no arguments and no database.
    pub fn new(command: Literal) -> Self {
        Self::with_body(command, Body::Command)
    }

    /// A timed `PING` whose successful reply is replaced by timing.
    pub fn ping() -> Self {
        Self::with_body(Literal::Ping, Body::Ping)
    }

    /// `SELECT <db>`, must succeed.
    ///
    /// The outbound pump treats it as its own database switch, so later
    /// messages are routed correctly.
    pub fn select(db: u32) -> Self {
        Self::new(Literal::Select)
            .db(db)
            .arg(db)
            .expect(Literal::Ok)
            .critical()
    }

    /// `AUTH <password>`, must succeed.
    pub fn auth(password: &str) -> Self {
        Self::new(Literal::Auth)
            .arg(password)
            .expect(Literal::Ok)
            .critical()
    }

    /// `QUIT`, must succeed.
    pub fn quit() -> Self {
        Self::new(Literal::Quit).expect(Literal::Ok).critical()
    }

    /// Wraps `inner` for use inside MULTI.
    pub(crate) fn queued(inner: Arc<Message>) -> Self {
        let mut message = Self::with_body(inner.command, Body::Queued(Arc::clone(&inner)));
        message.db = inner.db;
        message.expected = Some(Literal::Queued);
        message.critical = true;
        message
    }

    /// A whole transaction, written as one contiguous MULTI/EXEC block.
    pub(crate) fn batch(members: Vec<Arc<Message>>) -> Self {
        Self::with_body(Literal::Multi, Body::Batch(members))
    }

    /// Targets a logical database.
    pub fn db(mut self, db: u32) -> Self {
        self.db = Some(db);
        self
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<A: Into<Arg>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Requires the reply to equal `literal`; anything else becomes an error.
    pub fn expect(mut self, literal: Literal) -> Self {
        self.expected = Some(literal);
        self
    }

    /// Marks the message as must-succeed: an error reply is fatal for the
    /// connection.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn target_db(&self) -> Option<u32> {
        self.db
    }

    pub fn command(&self) -> Literal {
        self.command
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    pub fn expected(&self) -> Option<Literal> {
        self.expected
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True for a plain `SELECT` command.
    pub(crate) fn is_select(&self) -> bool {
        self.command == Literal::Select && matches!(self.body, Body::Command)
    }

    /// Members of a transaction batch, if this is one.
    pub(crate) fn members(&self) -> Option<&[Arc<Message>]> {
        match &self.body {
            Body::Batch(members) => Some(members),
            _ => None,
        }
    }

    fn sink_slot(&self) -> MutexGuard<'_, SinkSlot> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Assigns the completion. A message takes exactly one.
    pub fn set_completion(&self, sink: Box<dyn Sink>) -> Result<()> {
        let mut slot = self.sink_slot();
        match *slot {
            SinkSlot::Empty => {
                *slot = SinkSlot::Assigned(sink);
                Ok(())
            }
            _ => Err(RedisError::CompletionAssigned),
        }
    }

    /// Removes the completion, leaving the message without one.
    pub(crate) fn take_sink(&self) -> Option<Box<dyn Sink>> {
        let mut slot = self.sink_slot();
        match std::mem::replace(&mut *slot, SinkSlot::Consumed) {
            SinkSlot::Assigned(sink) => Some(sink),
            _ => None,
        }
    }

    /// `NotSent -> Sent`. False if the message was cancelled (or already sent).
    pub fn try_mark_sent(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                MessageState::NotSent as u8,
                MessageState::Sent as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            let _ = self.sent_at.set(Instant::now());
        }
        won
    }

    /// `NotSent -> Complete`, resolving the completion as cancelled.
    /// False if the message was already picked up for sending.
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                MessageState::NotSent as u8,
                MessageState::Complete as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.deliver_failure(RedisError::Cancelled);
        }
        won
    }

    /// Delivers the reply this message was matched with.
    ///
    /// Only the first call has any effect on the completion.
    pub fn complete(&self, reply: Reply) {
        self.state
            .store(MessageState::Complete as u8, Ordering::Release);
        let reply = match &self.body {
            Body::Queued(inner) => {
                // the inner command only hears about a failed enqueue; its
                // real reply comes with EXEC
                if let Reply::Error(message) = &reply {
                    inner.fail(RedisError::Server(message.clone()));
                }
                reply
            }
            Body::Ping if !reply.is_error() => {
                let now = Instant::now();
                let sent = self.sent_at.get().copied().unwrap_or(self.created);
                Reply::Timing {
                    queued: sent.saturating_duration_since(self.created),
                    round_trip: now.saturating_duration_since(sent),
                }
            }
            _ => reply,
        };
        if let Some(sink) = self.take_sink() {
            sink.complete(reply);
        }
    }

    /// Completes the message with an error instead of a reply.
    pub fn fail(&self, error: RedisError) {
        self.state
            .store(MessageState::Complete as u8, Ordering::Release);
        self.deliver_failure(error);
    }

    fn deliver_failure(&self, error: RedisError) {
        match &self.body {
            Body::Queued(inner) => inner.fail(error.clone()),
            Body::Batch(members) => {
                for member in members {
                    member.fail(error.clone());
                }
            }
            _ => {}
        }
        if let Some(sink) = self.take_sink() {
            sink.fail(error);
        }
    }

    /// Writes the command frame.
    ///
    /// A queued envelope writes the command it wraps. A batch writes nothing:
    /// the outbound pump expands it, because each frame of the block needs its
    /// own place in the sent ledger.
    pub fn encode(&self, buf: &mut BytesMut) {
        match &self.body {
            Body::Queued(inner) => inner.encode(buf),
            Body::Batch(_) => {}
            Body::Command | Body::Ping => {
                write_command_header(buf, self.args.len());
                write_bulk(buf, self.command.as_bytes());
                for arg in &self.args {
                    arg.encode(buf);
                }
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.db {
            Some(db) => write!(f, "{}: {}", db, self.command),
            None => write!(f, "{}", self.command),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("db", &self.db)
            .field("command", &self.command)
            .field("args", &self.args.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::protocol::ReplyReader;

    fn encoded(message: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_encode_command() {
        let message = Message::new(Literal::Set).arg("key").arg("value");
        assert_eq!(
            encoded(&message),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_encoded_command_reads_back_as_bulk_array() {
        let message = Message::new(Literal::Set).arg("key").arg(7i64).arg(1234i64);
        let bytes = encoded(&message);
        let reply = ReplyReader::new(&bytes[..]).read_reply().unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::Multi(vec![
                Reply::bulk("SET"),
                Reply::bulk("key"),
                Reply::bulk("7"),
                Reply::bulk("1234"),
            ])
        );
    }

    #[test]
    fn test_queued_envelope_writes_inner_command() {
        let inner = Arc::new(Message::new(Literal::Get).db(2).arg("k"));
        let envelope = Message::queued(Arc::clone(&inner));
        assert_eq!(encoded(&envelope), encoded(&inner));
        assert_eq!(envelope.expected(), Some(Literal::Queued));
        assert!(envelope.is_critical());
        assert_eq!(envelope.target_db(), Some(2));
    }

    #[test]
    fn test_display() {
        assert_eq!(Message::new(Literal::Get).db(3).to_string(), "3: GET");
        assert_eq!(Message::ping().to_string(), "PING");
    }

    #[test]
    fn test_select_targets_its_database() {
        let select = Message::select(5);
        assert_eq!(select.target_db(), Some(5));
        assert!(select.is_select());
        assert!(!Message::new(Literal::Get).db(5).is_select());
        assert!(!Message::queued(Arc::new(Message::select(5))).is_select());
    }

    #[test]
    fn test_completion_assigned_once() {
        let message = Message::new(Literal::Get);
        let (_first, first_sink) = Completion::pair(Reply::into_string);
        let (_second, second_sink) = Completion::pair(Reply::into_string);
        assert!(message.set_completion(Box::new(first_sink)).is_ok());
        assert!(matches!(
            message.set_completion(Box::new(second_sink)),
            Err(RedisError::CompletionAssigned)
        ));
    }

    #[test]
    fn test_complete_twice_delivers_first() {
        let message = Message::new(Literal::Get);
        let (mut completion, sink) = Completion::pair(Reply::into_string);
        message.set_completion(Box::new(sink)).unwrap();
        assert!(message.try_mark_sent());

        message.complete(Reply::bulk("first"));
        message.complete(Reply::bulk("second"));
        message.fail(RedisError::ConnectionTerminated("shutdown".into()));

        assert_eq!(
            completion.try_take().unwrap().unwrap(),
            Some("first".to_string())
        );
        assert_eq!(message.state(), MessageState::Complete);
    }

    #[test]
    fn test_cancel_races_with_send() {
        let message = Arc::new(Message::new(Literal::Get));
        let (mut completion, sink) = Completion::pair(Reply::into_string);
        message.set_completion(Box::new(sink)).unwrap();
        completion.attach(&message);

        assert!(completion.cancel());
        assert!(!message.try_mark_sent());
        assert!(matches!(completion.try_take(), Some(Err(RedisError::Cancelled))));

        let sent = Message::new(Literal::Get);
        assert!(sent.try_mark_sent());
        assert!(!sent.cancel());
        assert_eq!(sent.state(), MessageState::Sent);
    }

    #[test]
    fn test_ping_reply_becomes_timing() {
        let message = Message::ping().expect(Literal::Pong);
        let (mut completion, sink) = Completion::pair(Reply::into_reply);
        message.set_completion(Box::new(sink)).unwrap();
        message.try_mark_sent();
        message.complete(Reply::status("PONG"));
        assert!(matches!(
            completion.try_take(),
            Some(Ok(Reply::Timing { .. }))
        ));
    }

    #[test]
    fn test_failed_batch_fails_members() {
        let member = Arc::new(Message::new(Literal::Incr).arg("n"));
        let (mut completion, sink) = Completion::pair(Reply::into_i64);
        member.set_completion(Box::new(sink)).unwrap();

        let batch = Message::batch(vec![Arc::clone(&member)]);
        batch.fail(RedisError::Aborted);
        assert!(matches!(completion.try_take(), Some(Err(RedisError::Aborted))));
    }

    #[test]
    fn test_queued_error_fails_inner() {
        let inner = Arc::new(Message::new(Literal::Incr).arg("n"));
        let (mut completion, sink) = Completion::pair(Reply::into_i64);
        inner.set_completion(Box::new(sink)).unwrap();

        let envelope = Message::queued(Arc::clone(&inner));
        envelope.complete(Reply::status("QUEUED"));
        assert!(!completion.is_complete());

        let envelope = Message::queued(Arc::clone(&inner));
        envelope.complete(Reply::error("ERR unknown command"));
        assert!(matches!(completion.try_take(), Some(Err(RedisError::Server(_)))));
    }
}
