//! Completion Bridge
//!
//! Every message carries one single-assignment result slot, a
//! `tokio::sync::oneshot` channel. The caller holds the receiving end, a
//! [`Completion<T>`], and the engine holds the sending end, a
//! [`Completer<T>`] stored on the message as a boxed [`Sink`].
//!
//! ```text
//!   Connection::execute_with(msg, Reply::into_i64)
//!        │
//!        ├──> Completer<i64> ──(boxed Sink)──> Message ──> queue ──> pumps
//!        │                                                          │
//!        └──> Completion<i64> <──── send(extract(reply)) <──────────┘
//! ```
//!
//! The shape of the result is chosen by a plain function pointer
//! (`fn(Reply) -> Result<T>`), so there is one completion type for every
//! shape instead of one per shape.
//!
//! A `Completion<T>` is a `Future`. Synchronous callers use the blocking
//! helpers on `Connection` (`wait`, `wait_all`, `wait_any`), which drive the
//! completions on a private current-thread runtime under a timeout.

use crate::error::{RedisError, Result};
use crate::message::Message;
use crate::protocol::Reply;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Receives the final outcome of a message. Called at most once.
pub trait Sink: Send {
    /// Delivers the reply the message was matched with.
    fn complete(self: Box<Self>, reply: Reply);

    /// Delivers a failure that replaces the reply.
    fn fail(self: Box<Self>, error: RedisError);
}

fn dropped() -> RedisError {
    RedisError::ConnectionTerminated("the message was dropped without a reply".to_string())
}

/// The writing end of a completion.
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
    extract: fn(Reply) -> Result<T>,
}

impl<T> Completer<T> {
    /// Resolves the completion directly. Returns false if the reader is gone.
    pub fn resolve(self, outcome: Result<T>) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

impl<T: Send> Sink for Completer<T> {
    fn complete(self: Box<Self>, reply: Reply) {
        let outcome = (self.extract)(reply);
        let _ = self.tx.send(outcome);
    }

    fn fail(self: Box<Self>, error: RedisError) {
        let _ = self.tx.send(Err(error));
    }
}

/// The reading end of a completion: a future for one command's result.
///
/// If the writing end is dropped without an outcome the completion resolves
/// to [`RedisError::ConnectionTerminated`].
pub struct Completion<T> {
    /// `None` once the outcome has been received.
    rx: Option<oneshot::Receiver<Result<T>>>,
    /// Received but not yet handed out.
    outcome: Option<Result<T>>,
    message: Weak<Message>,
}

// the outcome is never pinned
impl<T> Unpin for Completion<T> {}

impl<T> Completion<T> {
    /// Creates a connected completion/completer pair.
    pub fn pair(extract: fn(Reply) -> Result<T>) -> (Completion<T>, Completer<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            rx: Some(rx),
            outcome: None,
            message: Weak::new(),
        };
        (completion, Completer { tx, extract })
    }

    /// Creates a completion that is already resolved.
    pub fn ready(outcome: Result<T>) -> Completion<T> {
        Completion {
            rx: None,
            outcome: Some(outcome),
            message: Weak::new(),
        }
    }

    /// Links the completion to its message so it can be cancelled.
    pub(crate) fn attach(&mut self, message: &Arc<Message>) {
        self.message = Arc::downgrade(message);
    }

    /// Returns true once an outcome (value, error or cancellation) has been
    /// delivered.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
            || match &self.rx {
                Some(rx) => !rx.is_empty(),
                None => true,
            }
    }

    /// Cancels the command if it has not been written yet.
    ///
    /// Returns true if the cancellation took effect; the completion then
    /// resolves to [`RedisError::Cancelled`].
    pub fn cancel(&self) -> bool {
        match self.message.upgrade() {
            Some(message) => message.cancel(),
            None => false,
        }
    }

    /// Takes the outcome if it is available.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        if let Some(outcome) = self.outcome.take() {
            return Some(outcome);
        }
        let outcome = match self.rx.as_mut()?.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(dropped()),
        };
        self.rx = None;
        Some(outcome)
    }

    /// Moves the outcome out of the channel once it arrives.
    fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.outcome.is_some() {
            return Poll::Ready(());
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(received) => {
                self.outcome = Some(received.unwrap_or_else(|_| Err(dropped())));
                self.rx = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.poll_outcome(cx) {
            Poll::Ready(()) => Poll::Ready(this.outcome.take().unwrap_or(Err(
                RedisError::InvalidState("completion polled after it returned a result"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Anything the blocking wait helpers can watch.
pub trait Pending {
    /// Returns true once the outcome is available.
    fn is_complete(&self) -> bool;

    /// Ready once the outcome is available. The outcome stays in place for
    /// a later `try_take` or `.await`.
    fn poll_complete(&mut self, cx: &mut Context<'_>) -> Poll<()>;
}

impl<T> Pending for Completion<T> {
    fn is_complete(&self) -> bool {
        Completion::is_complete(self)
    }

    fn poll_complete(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.poll_outcome(cx)
    }
}

/// Drives `future` on a private current-thread runtime for at most `limit`.
///
/// Returns `Ok(None)` on timeout. Must not be called from inside an async
/// context.
pub(crate) fn block_with_timeout<F: Future>(
    future: F,
    limit: Duration,
) -> Result<Option<F::Output>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    Ok(runtime.block_on(async { tokio::time::timeout(limit, future).await.ok() }))
}
