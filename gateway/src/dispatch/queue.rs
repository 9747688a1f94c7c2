use super::{EventHandler, ShardEvent};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fans dispatches out to an [`EventHandler`] with one ordered worker per
/// shard. Shards never wait on each other.
pub struct EventDispatchQueue {
    handler: Arc<dyn EventHandler>,
    capacity: usize,
    workers: Mutex<HashMap<u16, Worker>>,
}

struct Worker {
    tx: mpsc::Sender<ShardEvent>,
    arrival: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl EventDispatchQueue {
    pub fn new<H: EventHandler>(handler: H, capacity: usize) -> Self {
        Self::with_handler(Arc::new(handler), capacity)
    }

    pub fn with_handler(handler: Arc<dyn EventHandler>, capacity: usize) -> Self {
        Self {
            handler,
            capacity: capacity.max(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the sending half for `shard_id`, starting its worker if needed.
    /// Registering a shard again, e.g. after a restart, feeds the same worker,
    /// so events are still handled in arrival order.
    pub fn register(&self, shard_id: u16, shard_count: u16) -> EventSender {
        let mut workers = self.workers.lock();

        let start = match workers.get(&shard_id) {
            Some(worker) if !worker.handle.is_finished() => false,
            Some(_) => {
                warn!(shard_id, "Event worker died, starting a new one");
                true
            }
            None => true,
        };

        if start {
            let (tx, rx) = mpsc::channel(self.capacity);
            let handle = tokio::spawn(worker(shard_id, Arc::clone(&self.handler), rx));

            workers.insert(
                shard_id,
                Worker {
                    tx,
                    arrival: Arc::new(AtomicU64::new(0)),
                    handle,
                },
            );
        } else {
            debug!(shard_id, "Reusing event worker");
        }

        let worker = &workers[&shard_id];
        EventSender {
            shard_id,
            shard_count,
            tx: worker.tx.clone(),
            arrival: Arc::clone(&worker.arrival),
        }
    }

    /// Waits for every worker to finish. Workers finish once all senders for
    /// their shard have been dropped and the backlog has been handled.
    pub async fn join(&self) {
        let workers: Vec<_> = self.workers.lock().drain().collect();

        for (shard_id, worker) in workers {
            drop(worker.tx);

            if let Err(e) = worker.handle.await {
                warn!(shard_id, error = %e, "Event worker panicked");
            }
        }
    }
}

async fn worker(shard_id: u16, handler: Arc<dyn EventHandler>, mut rx: mpsc::Receiver<ShardEvent>) {
    while let Some(event) = rx.recv().await {
        let seq = event.seq;
        if let Err(e) = handler.handle(event).await {
            warn!(shard_id, seq, error = %e, "Event handler returned an error");
        }
    }

    debug!(shard_id, "Event worker stopped");
}

/// Sending half of one shard's queue. Sends wait while the queue is full.
#[derive(Debug)]
pub struct EventSender {
    shard_id: u16,
    shard_count: u16,
    tx: mpsc::Sender<ShardEvent>,
    arrival: Arc<AtomicU64>,
}

impl EventSender {
    /// Returns false if the queue has been shut down.
    pub async fn send(&self, seq: u64, name: String, data: Box<RawValue>) -> bool {
        let event = ShardEvent {
            shard_id: self.shard_id,
            shard_count: self.shard_count,
            arrival: self.arrival.fetch_add(1, Ordering::Relaxed),
            received_at: Instant::now(),
            seq,
            name,
            data,
        };

        self.tx.send(event).await.is_ok()
    }

    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }
}
