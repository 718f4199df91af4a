//! Replies produced for requests whose reply publish failed.
//!
//! A requeued request comes back with the same correlation id. Its stored
//! reply is resent instead of running the handler a second time.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

/// Default number of replies kept.
pub const DEFAULT_SETTLED_CAPACITY: usize = 1024;

#[derive(Default)]
struct Entries {
    replies: HashMap<String, Bytes>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded store of encoded replies keyed by correlation id.
///
/// The oldest entry is evicted once `capacity` is reached.
pub struct SettledReplies {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl SettledReplies {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, correlation_id: &str, body: Bytes) {
        let mut entries = self.entries.lock();
        if entries
            .replies
            .insert(correlation_id.to_string(), body)
            .is_none()
        {
            entries.order.push_back(correlation_id.to_string());
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.replies.remove(&oldest);
            }
        }
    }

    pub fn get(&self, correlation_id: &str) -> Option<Bytes> {
        self.entries.lock().replies.get(correlation_id).cloned()
    }

    pub fn remove(&self, correlation_id: &str) {
        let mut entries = self.entries.lock();
        if entries.replies.remove(correlation_id).is_some() {
            entries.order.retain(|id| id != correlation_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SettledReplies {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLED_CAPACITY)
    }
}
