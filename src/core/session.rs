// src/core/session.rs

use crate::models::SessionRecord;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use uuid::Uuid;

/// Live driver sessions, keyed by the worker thread and the test result they serve.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<(ThreadId, Uuid), SessionRecord>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(ThreadId, Uuid), SessionRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the session `thread` opened for `record.result_id`.
    pub fn register(&self, thread: ThreadId, record: SessionRecord) {
        self.lock().insert((thread, record.result_id), record);
    }

    /// A copy of the record, if it is still live.
    pub fn get(&self, thread: ThreadId, result_id: Uuid) -> Option<SessionRecord> {
        self.lock().get(&(thread, result_id)).cloned()
    }

    /// Drops the record, returning it if it was present.
    pub fn remove(&self, thread: ThreadId, result_id: Uuid) -> Option<SessionRecord> {
        self.lock().remove(&(thread, result_id))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// No session is live.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
