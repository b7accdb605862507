//! Pending change queue for edits that could not be transmitted.
//!
//! Holds full-document replacements in submission order. Entries are
//! removed when they are handed to the channel, not when the server
//! acknowledges them (the protocol has no acks). A change whose
//! transmission fails stays at the head of the queue and nothing behind it
//! is sent, so "was offline" and "send failed" end up in the same place
//! and a newer change is never overtaken by an older one.

use std::collections::VecDeque;

use crate::position::char_len;

/// A buffered full-document replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub content: String,
}

impl PendingChange {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Outcome of one [`PendingQueue::flush`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Changes handed to the channel.
    pub sent: usize,
    /// Changes left queued after the first failure.
    pub requeued: usize,
    /// Content of the last change that was sent, if any.
    pub last_sent: Option<String>,
}

/// FIFO of [`PendingChange`]s.
#[derive(Debug, Default)]
pub struct PendingQueue {
    changes: VecDeque<PendingChange>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change. O(1).
    pub fn enqueue(&mut self, change: PendingChange) {
        self.changes.push_back(change);
    }

    /// Transmit queued changes in insertion order.
    ///
    /// `send` receives each change together with the char length of the
    /// content it replaces. The running base starts at `baseline` and
    /// becomes each change's content once that change has been sent.
    /// The first change for which `send` returns an error stops the flush:
    /// it and every change behind it stay queued, unsent and in order.
    pub fn flush<E, F>(&mut self, baseline: &str, mut send: F) -> FlushReport
    where
        F: FnMut(&PendingChange, usize) -> Result<(), E>,
    {
        let mut report = FlushReport::default();
        let mut base_len = char_len(baseline);

        while let Some(change) = self.changes.pop_front() {
            if send(&change, base_len).is_err() {
                self.changes.push_front(change);
                break;
            }
            base_len = char_len(&change.content);
            report.sent += 1;
            report.last_sent = Some(change.content);
        }

        report.requeued = self.changes.len();
        report
    }

    /// Content of the most recently queued change.
    pub fn latest(&self) -> Option<&str> {
        self.changes.back().map(|c| c.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.iter()
    }

    /// Total queued payload size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.changes.iter().map(|c| c.content.len()).sum()
    }
}
