// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pending read queue
//!
//! Read-report requests wait here until the readiness timer decides the
//! device has "data ready". Each entry owns the completion of its request
//! and is completed at most once: whoever removes it from the queue (the
//! timer, a cancellation, or device teardown) is the only one able to
//! complete it.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use super::{HidError, Result};

/// Final outcome of a deferred read: the report bytes, or an error.
pub type Completion = Result<Vec<u8>>;

type CompletionFn = Box<dyn FnOnce(Completion) + Send>;

/// Identity of a pending read, used for cancellation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadId(u64);

impl ReadId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read#{}", self.0)
    }
}

/// A parked read-report request
pub struct PendingRead {
    id: ReadId,
    capacity: usize,
    complete: CompletionFn,
}

impl PendingRead {
    pub fn id(&self) -> ReadId {
        self.id
    }

    /// Output buffer capacity of the parked request
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Complete the request. Consumes the entry, so it cannot run twice.
    pub fn complete(self, completion: Completion) {
        (self.complete)(completion);
    }
}

impl fmt::Debug for PendingRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// FIFO of pending reads with an optional depth bound
#[derive(Debug)]
pub struct PendingReadQueue {
    reads: VecDeque<PendingRead>,
    max_depth: Option<usize>,
    next_id: u64,
}

impl PendingReadQueue {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            reads: VecDeque::new(),
            max_depth,
            next_id: 1,
        }
    }

    /// Park a read. On error the callback is dropped without being called.
    pub fn enqueue<F>(&mut self, capacity: usize, complete: F) -> Result<ReadId>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        if let Some(max) = self.max_depth
            && self.reads.len() >= max
        {
            return Err(HidError::QueueFull(max));
        }

        let id = ReadId(self.next_id);
        self.next_id += 1;
        self.reads.push_back(PendingRead {
            id,
            capacity,
            complete: Box::new(complete),
        });
        Ok(id)
    }

    /// Oldest pending read, if any
    pub fn try_dequeue_one(&mut self) -> Option<PendingRead> {
        self.reads.pop_front()
    }

    /// Remove a read by identity. `None` if it is no longer queued.
    pub fn remove(&mut self, id: ReadId) -> Option<PendingRead> {
        let pos = self.reads.iter().position(|r| r.id == id)?;
        self.reads.remove(pos)
    }

    /// Take every pending read, oldest first
    pub fn drain(&mut self) -> Vec<PendingRead> {
        self.reads.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// Handle to a deferred read, resolved when the request completes.
#[derive(Debug)]
pub struct ReadCompletion {
    id: ReadId,
    rx: flume::Receiver<Completion>,
}

impl ReadCompletion {
    /// Build a handle and the callback that resolves it
    pub(crate) fn channel() -> (impl FnOnce(Completion) + Send + 'static, PendingHandle) {
        let (tx, rx) = flume::bounded(1);
        let complete = move |completion: Completion| {
            // The requester may have stopped waiting.
            let _ = tx.send(completion);
        };
        (complete, PendingHandle { rx })
    }

    pub fn id(&self) -> ReadId {
        self.id
    }

    /// Block until the read completes.
    ///
    /// A read dropped without completion (device torn down) resolves to
    /// [`HidError::Cancelled`].
    pub fn wait(self) -> Completion {
        self.rx.recv().map_err(|_| HidError::Cancelled)?
    }

    /// Wait up to `timeout`. `None` if the read is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Completion> {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(flume::RecvTimeoutError::Timeout) => None,
            Err(flume::RecvTimeoutError::Disconnected) => Some(Err(HidError::Cancelled)),
        }
    }

    /// Non-blocking poll. `None` if the read is still pending.
    pub fn try_take(&self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(HidError::Cancelled)),
        }
    }

    pub async fn wait_async(self) -> Completion {
        self.rx
            .recv_async()
            .await
            .map_err(|_| HidError::Cancelled)?
    }
}

/// Receiving half of a [`ReadCompletion`] before its id is known
pub(crate) struct PendingHandle {
    rx: flume::Receiver<Completion>,
}

impl PendingHandle {
    pub(crate) fn with_id(self, id: ReadId) -> ReadCompletion {
        ReadCompletion { id, rx: self.rx }
    }
}
