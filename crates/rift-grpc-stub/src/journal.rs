//! Append-only request logs.

use crate::request::Request;
use parking_lot::RwLock;
use std::sync::Arc;

/// Concurrency-safe sequence of requests. Appends take the write lock,
/// snapshots the read lock.
#[derive(Debug, Default)]
pub struct CallLog {
    entries: RwLock<Vec<Arc<Request>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<'a>(&self, requests: impl IntoIterator<Item = &'a Arc<Request>>) {
        self.entries.write().extend(requests.into_iter().cloned());
    }

    pub fn snapshot(&self) -> Vec<Arc<Request>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
