//! Bounded history of recent raw messages.
//!
//! Keeps the last `capacity` messages so a client asking for `"history"`
//! gets a short snapshot without the server holding unbounded state.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default number of messages retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;

/// Which history a connection reads from and appends to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryScope {
    /// One history shared by every connection on the server.
    #[default]
    Shared,
    /// Each connection keeps its own private history.
    PerConnection,
}

/// A fixed-capacity FIFO of messages, safe to share between tasks.
#[derive(Debug)]
pub struct MessageHistory {
    messages: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl MessageHistory {
    /// Create an empty history holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest once capacity is exceeded.
    pub fn add_message(&self, msg: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut messages = self.messages.lock();
        messages.push_back(msg.into());
        while messages.len() > self.capacity {
            let _ = messages.pop_front();
        }
    }

    /// Copy of the stored messages, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.messages.lock().iter().cloned().collect()
    }

    /// Number of messages currently stored.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether no messages are stored.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Maximum number of messages retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
