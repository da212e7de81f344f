//! MULTI/EXEC Transactions
//!
//! A [`Transaction`] collects commands locally instead of sending them. On
//! [`Transaction::execute`] the collected commands are handed to the
//! connection as a single batch message, which the outgoing pump writes as
//! one uninterrupted block:
//!
//! ```text
//!   MULTI                     -> +OK
//!   SET a 1   (envelope)      -> +QUEUED
//!   INCR a    (envelope)      -> +QUEUED
//!   EXEC                      -> *2 [+OK, :2]
//!                                    │    │
//!                                    ▼    ▼
//!                          SET's completion, INCR's completion
//! ```
//!
//! Callers await each command's own completion exactly as they would outside
//! a transaction; only the EXEC reply feeds them. The completion returned by
//! `execute` resolves after every nested result has been dispatched.

use crate::completion::{Completion, Sink};
use crate::connection::pump::{dispatch_reply, Shared};
use crate::connection::Executor;
use crate::error::{RedisError, Result};
use crate::message::Message;
use crate::protocol::Reply;
use crate::queue::{Closed, DualPriorityQueue};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Completion for the EXEC frame of a transaction block.
///
/// `slots` lines up with the EXEC reply: `Some` for a caller's command,
/// `None` for a database switch the pump inserted.
pub(crate) struct ExecSink {
    shared: Weak<Shared>,
    slots: Vec<Option<Arc<Message>>>,
    done: Option<Box<dyn Sink>>,
}

impl ExecSink {
    pub fn new(
        shared: Weak<Shared>,
        slots: Vec<Option<Arc<Message>>>,
        done: Option<Box<dyn Sink>>,
    ) -> Self {
        Self {
            shared,
            slots,
            done,
        }
    }

    fn fail_all(self, error: RedisError) {
        for member in self.slots.into_iter().flatten() {
            member.fail(error.clone());
        }
        if let Some(done) = self.done {
            done.fail(error);
        }
    }

    /// Hands each nested result to its command, the same way top-level
    /// replies are handled.
    fn dispatch(self, results: Vec<Reply>) {
        let Some(shared) = self.shared.upgrade() else {
            self.fail_all(RedisError::ConnectionTerminated(
                "the connection is gone".to_string(),
            ));
            return;
        };
        let mut critical = None;
        for (slot, result) in self.slots.into_iter().zip(results) {
            if let Some(member) = slot {
                if let Err(err) = dispatch_reply(&shared, &member, result) {
                    critical.get_or_insert(err);
                }
            }
        }
        if let Some(done) = self.done {
            done.complete(Reply::status("OK"));
        }
        if let Some(err) = critical {
            shared.shutdown("a critical command failed", Some(err));
        }
    }
}

impl Sink for ExecSink {
    fn complete(self: Box<Self>, reply: Reply) {
        let this = *self;
        match reply {
            Reply::Multi(results) if results.len() == this.slots.len() => this.dispatch(results),
            Reply::Multi(results) => {
                let error = RedisError::Transaction(format!(
                    "EXEC returned {} results for {} queued commands",
                    results.len(),
                    this.slots.len()
                ));
                this.fail_all(error);
            }
            Reply::Bulk(None) => {
                this.fail_all(RedisError::Transaction("EXEC was aborted".to_string()))
            }
            Reply::Error(message) => this.fail_all(RedisError::Server(message)),
            other => this.fail_all(RedisError::Transaction(format!(
                "unexpected EXEC reply: {}",
                other.kind()
            ))),
        }
    }

    fn fail(self: Box<Self>, error: RedisError) {
        (*self).fail_all(error);
    }
}

/// A transaction-scoped view of a connection.
///
/// Commands issued through a transaction are held back until `execute`.
/// Dropping a transaction with pending commands discards them.
pub struct Transaction {
    shared: Arc<Shared>,
    pending: DualPriorityQueue<Arc<Message>>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            pending: DualPriorityQueue::unbounded(),
        }
    }

    /// Number of commands waiting for `execute`.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sends everything collected so far as one MULTI/EXEC block.
    ///
    /// The transaction can be reused afterwards for another block.
    pub fn execute(&self) -> Completion<()> {
        self.execute_prioritized(false)
    }

    /// Like [`execute`](Self::execute), but the whole block can jump the
    /// connection's standard queue.
    pub fn execute_prioritized(&self, high_priority: bool) -> Completion<()> {
        let members = self.pending.dequeue_all();
        if members.is_empty() {
            return Completion::ready(Ok(()));
        }
        debug!(commands = members.len(), high_priority, "Executing transaction");

        let (mut completion, completer) = Completion::pair(Reply::into_unit);
        let batch = Message::batch(members);
        if let Err(err) = batch.set_completion(Box::new(completer)) {
            batch.fail(err);
            return completion;
        }
        let batch = Arc::new(batch);
        completion.attach(&batch);
        if let Err(err) = self.shared.enqueue(Arc::clone(&batch), high_priority) {
            batch.fail(err);
        }
        completion
    }

    /// Cancels every collected command without sending anything.
    /// Returns how many were discarded.
    pub fn discard(&self) -> usize {
        let members = self.pending.dequeue_all();
        let count = members.len();
        for member in members {
            member.cancel();
        }
        if count > 0 {
            debug!(commands = count, "Transaction discarded");
        }
        count
    }
}

impl Executor for Transaction {
    fn enqueue(&self, message: Arc<Message>, high_priority: bool) -> Result<()> {
        self.pending
            .enqueue(message, high_priority)
            .map_err(|Closed(_)| RedisError::QueueClosed)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.discard();
    }
}
