//! Connection counters
//!
//! The pumps bump these with relaxed atomic increments, so a snapshot can be
//! taken at any time without blocking either of them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Databases 0..TRACKED_DBS get a lock-free usage counter.
const TRACKED_DBS: usize = 16;

/// Live statistics for one connection.
#[derive(Debug, Default)]
pub(crate) struct ConnectionStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub queue_jumpers: AtomicU64,
    pub messages_cancelled: AtomicU64,
    pub timeouts: AtomicU64,
    pub error_messages: AtomicU64,
    db_usage: [AtomicU64; TRACKED_DBS],
    /// Rarely used databases beyond the tracked range.
    db_overflow: Mutex<BTreeMap<u32, u64>>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_jumper(&self) {
        self.queue_jumpers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_cancelled(&self) {
        self.messages_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_message(&self) {
        self.error_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn db_used(&self, db: u32) {
        match self.db_usage.get(db as usize) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                let mut overflow = self.db_overflow.lock().unwrap_or_else(|e| e.into_inner());
                *overflow.entry(db).or_insert(0) += 1;
            }
        }
    }

    /// Takes a snapshot. Queue lengths are supplied by the caller.
    pub fn snapshot(&self, unsent_queue: usize, sent_queue: usize) -> Counters {
        let mut db_usage: Vec<(u32, u64)> = self
            .db_usage
            .iter()
            .enumerate()
            .map(|(db, count)| (db as u32, count.load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();
        {
            let overflow = self.db_overflow.lock().unwrap_or_else(|e| e.into_inner());
            db_usage.extend(overflow.iter().map(|(db, count)| (*db, *count)));
        }
        // most used first
        db_usage.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Counters {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            queue_jumpers: self.queue_jumpers.load(Ordering::Relaxed),
            messages_cancelled: self.messages_cancelled.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            error_messages: self.error_messages.load(Ordering::Relaxed),
            unsent_queue,
            sent_queue,
            db_usage,
        }
    }
}

/// A point-in-time copy of a connection's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counters {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub queue_jumpers: u64,
    pub messages_cancelled: u64,
    pub timeouts: u64,
    pub error_messages: u64,
    /// Messages waiting in the outbound queue
    pub unsent_queue: usize,
    /// Messages written but not yet answered
    pub sent_queue: usize,
    /// `(db, messages)` ordered by descending usage
    pub db_usage: Vec<(u32, u64)>,
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sent: {}", self.messages_sent)?;
        writeln!(f, "Received: {}", self.messages_received)?;
        writeln!(f, "Cancelled: {}", self.messages_cancelled)?;
        writeln!(f, "Timeouts: {}", self.timeouts)?;
        writeln!(f, "Queue jumpers: {}", self.queue_jumpers)?;
        writeln!(f, "Sent queue: {}", self.sent_queue)?;
        writeln!(f, "Unsent queue: {}", self.unsent_queue)?;
        writeln!(f, "Error messages: {}", self.error_messages)?;
        for (db, count) in &self.db_usage {
            writeln!(f, "DB {}: {}", db, count)?;
        }
        Ok(())
    }
}
