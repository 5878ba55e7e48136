//! Queue for writes issued while the connection is not open.
//!
//! Payloads are stored pre-transform, in call order, and re-enter the normal
//! write path one by one when the connection opens, so buffered items pass
//! through transformers and the codec like any other write.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

#[derive(Debug, Default)]
pub(crate) struct OutgoingBuffer {
    queue: Mutex<VecDeque<Value>>,
}

impl OutgoingBuffer {
    // We can recover from a poisoned lock because VecDeque push/take leave no
    // inconsistent intermediate state.
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Value>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, data: Value) {
        self.queue().push_back(data);
    }

    /// Take every queued payload in call order, leaving the buffer empty in
    /// the same step.
    pub(crate) fn drain(&self) -> VecDeque<Value> {
        std::mem::take(&mut *self.queue())
    }

    pub(crate) fn len(&self) -> usize {
        self.queue().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}
