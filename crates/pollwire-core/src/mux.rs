//! Outbound multiplexer: per-tag bounded queues drained into batches.
//!
//! Each tag gets its own FIFO of pending chunks, created on first write and
//! never removed. Capacity is enforced with a semaphore per tag: a writer
//! takes one permit per chunk and a drain hands the permits back, so a full
//! queue makes writers wait instead of dropping data. Closing the
//! multiplexer closes every semaphore, which releases waiting writers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tracing::{debug, trace};

/// Default number of pending chunks a tag may hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// How a write behaves when its tag's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Wait until a drain frees space.
    #[default]
    Block,
    /// Wait at most this long, then fail with [`QueueFullError`].
    Timeout(Duration),
    /// Fail with [`QueueFullError`] without waiting.
    Immediate,
}

impl WritePolicy {
    /// `None` blocks, `Some(0)` fails immediately, anything else times out.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => WritePolicy::Block,
            Some(d) if d.is_zero() => WritePolicy::Immediate,
            Some(d) => WritePolicy::Timeout(d),
        }
    }
}

/// A write could not be enqueued because the tag's queue stayed full.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("queue for tag {tag:?} is full ({capacity} pending chunks)")]
pub struct QueueFullError {
    pub tag: String,
    pub capacity: usize,
}

/// Why a chunk was not enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Full(#[from] QueueFullError),

    #[error("outbound multiplexer is closed")]
    Closed,
}

struct TagQueue {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    space: Arc<Semaphore>,
}

impl TagQueue {
    fn new(capacity: usize) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Arc::new(Semaphore::new(capacity)),
        }
    }

    fn chunks(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.chunks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-tag buffered outbound queues. Safe to share across tasks.
pub struct OutboundMux {
    capacity: usize,
    queues: Mutex<HashMap<String, Arc<TagQueue>>>,
    closed: AtomicBool,
    wake: Notify,
}

impl OutboundMux {
    /// Create a multiplexer whose per-tag queues hold `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Per-tag capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<TagQueue>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self, tag: &str) -> Result<Arc<TagQueue>, EnqueueError> {
        let mut table = self.table();
        // Checked under the table lock so `close` cannot miss a new queue.
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed);
        }
        if let Some(queue) = table.get(tag) {
            return Ok(Arc::clone(queue));
        }
        debug!(tag, capacity = self.capacity, "Creating outbound queue");
        let queue = Arc::new(TagQueue::new(self.capacity));
        table.insert(tag.to_string(), Arc::clone(&queue));
        Ok(queue)
    }

    /// Refuse all further writes and release writers waiting for space.
    ///
    /// Chunks already queued stay queued and can still be drained.
    pub fn close(&self) {
        let table = self.table();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for queue in table.values() {
            queue.space.close();
        }
        debug!(tags = table.len(), "Outbound multiplexer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append `payload` to the queue for `tag`, waiting for space per `policy`.
    pub async fn write(
        &self,
        tag: &str,
        payload: Vec<u8>,
        policy: WritePolicy,
    ) -> Result<(), EnqueueError> {
        let queue = self.queue(tag)?;

        let permit = match policy {
            WritePolicy::Immediate => queue
                .space
                .try_acquire()
                .map_err(|e| self.rejected(tag, e))?,
            WritePolicy::Block => queue
                .space
                .acquire()
                .await
                .map_err(|_| EnqueueError::Closed)?,
            WritePolicy::Timeout(limit) => {
                match tokio::time::timeout(limit, queue.space.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(EnqueueError::Closed),
                    Err(_) => return Err(self.full(tag).into()),
                }
            }
        };
        // The permit now belongs to the queued chunk; drain releases it.
        permit.forget();
        self.push(tag, &queue, payload);
        Ok(())
    }

    /// Zero-wait write usable from synchronous code.
    pub fn try_write(&self, tag: &str, payload: Vec<u8>) -> Result<(), EnqueueError> {
        let queue = self.queue(tag)?;
        queue
            .space
            .try_acquire()
            .map_err(|e| self.rejected(tag, e))?
            .forget();
        self.push(tag, &queue, payload);
        Ok(())
    }

    fn full(&self, tag: &str) -> QueueFullError {
        QueueFullError {
            tag: tag.to_string(),
            capacity: self.capacity,
        }
    }

    fn rejected(&self, tag: &str, err: TryAcquireError) -> EnqueueError {
        match err {
            TryAcquireError::NoPermits => self.full(tag).into(),
            TryAcquireError::Closed => EnqueueError::Closed,
        }
    }

    fn push(&self, tag: &str, queue: &TagQueue, payload: Vec<u8>) {
        let depth = {
            let mut chunks = queue.chunks();
            chunks.push_back(payload);
            chunks.len()
        };
        trace!(tag, depth, "Chunk queued");
        self.wake.notify_one();
    }

    /// Collect everything queued right now, one concatenated buffer per tag.
    ///
    /// Never waits for data. Tags with nothing pending are omitted, so an
    /// empty map means there is nothing to send.
    pub fn drain_all(&self) -> BTreeMap<String, Vec<u8>> {
        let queues: Vec<(String, Arc<TagQueue>)> = self
            .table()
            .iter()
            .map(|(tag, queue)| (tag.clone(), Arc::clone(queue)))
            .collect();

        let mut drained = BTreeMap::new();
        for (tag, queue) in queues {
            let taken: Vec<Vec<u8>> = queue.chunks().drain(..).collect();
            if taken.is_empty() {
                continue;
            }
            queue.space.add_permits(taken.len());
            drained.insert(tag, taken.concat());
        }
        drained
    }

    /// Number of chunks pending for `tag`.
    pub fn pending(&self, tag: &str) -> usize {
        let queue = self.table().get(tag).cloned();
        queue.map(|q| q.chunks().len()).unwrap_or(0)
    }

    /// Pending chunk counts for every tag that has ever been written.
    pub fn pending_counts(&self) -> BTreeMap<String, usize> {
        let queues: Vec<(String, Arc<TagQueue>)> = self
            .table()
            .iter()
            .map(|(tag, queue)| (tag.clone(), Arc::clone(queue)))
            .collect();
        queues
            .into_iter()
            .map(|(tag, queue)| (tag, queue.chunks().len()))
            .collect()
    }

    /// Tags that have an outbound queue.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.table().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Resolve once a write has happened since the last call.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

impl Default for OutboundMux {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
