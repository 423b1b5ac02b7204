//! Partitioned work processor.
//!
//! A fixed set of strictly ordered execution lanes. Each partition owns one
//! unbounded queue and one consumer task that awaits every unit of work to
//! completion before taking the next, so work on one partition never runs
//! concurrently with itself while different partitions run in parallel.
//!
//! Maps are assigned a partition at load time, and generator ticks for a map
//! are queued on that partition. Changes arriving over the link run on the
//! partition of the connection they came in on instead, so a map may see
//! link changes and generator ticks concurrently. Blocks lock per operation
//! and role state is atomic, which keeps that safe; what is lost is a single
//! ordering of link changes against local ones on the same map.

use crate::error::WorldError;
use crate::types::PartitionId;
use crate::utils::lock;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One unit of queued work.
pub type Work = BoxFuture<'static, Result<(), WorldError>>;

#[derive(Debug)]
struct Partition {
    id: PartitionId,
    weight: AtomicUsize,
    sender: Mutex<Option<mpsc::UnboundedSender<Work>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Work>>>,
}

/// Fixed array of ordered work queues with greedy load assignment.
#[derive(Debug)]
pub struct PartitionedProcessor {
    partitions: Vec<Partition>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl PartitionedProcessor {
    /// Creates `count` partitions (at least one). Work may be queued right
    /// away; it starts executing once [`start`](Self::start) is called.
    pub fn new(count: usize) -> Self {
        let partitions = (0..count.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::unbounded_channel();
                Partition {
                    id: PartitionId(index),
                    weight: AtomicUsize::new(0),
                    sender: Mutex::new(Some(tx)),
                    receiver: Mutex::new(Some(rx)),
                }
            })
            .collect();

        Self {
            partitions,
            workers: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Spawns one consumer task per partition. Calling it again is a no-op.
    pub fn start(&self) {
        let mut workers = lock(&self.workers);
        for partition in &self.partitions {
            if let Some(receiver) = lock(&partition.receiver).take() {
                workers.push(tokio::spawn(run_partition(partition.id, receiver)));
            }
        }
        if !workers.is_empty() {
            info!("⚙️ Partitioned processor started with {} partitions", self.partitions.len());
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Current weight of a partition, or `None` for an unknown id.
    pub fn weight(&self, id: PartitionId) -> Option<usize> {
        self.partitions
            .get(id.0)
            .map(|partition| partition.weight.load(Ordering::Acquire))
    }

    /// Picks the lightest partition (first one on ties) and charges it one unit.
    ///
    /// Balancing happens only here; work already assigned never migrates.
    pub fn select_partition(&self) -> PartitionId {
        let mut best = &self.partitions[0];
        let mut best_weight = best.weight.load(Ordering::Acquire);
        for partition in &self.partitions[1..] {
            let weight = partition.weight.load(Ordering::Acquire);
            if weight < best_weight {
                best = partition;
                best_weight = weight;
            }
        }
        best.weight.fetch_add(1, Ordering::AcqRel);
        best.id
    }

    /// Releases one unit of weight from a partition.
    pub fn deselect_partition(&self, id: PartitionId) {
        if let Some(partition) = self.partitions.get(id.0) {
            let _ = partition
                .weight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| w.checked_sub(1));
        }
    }

    /// Queues work on a partition. Returns `false` once shutdown has begun
    /// or for an unknown partition; the work is dropped in that case.
    pub fn queue(&self, id: PartitionId, work: Work) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            debug!(partition = %id, "work rejected: processor shutting down");
            return false;
        }
        let Some(partition) = self.partitions.get(id.0) else {
            warn!(partition = %id, "work rejected: unknown partition");
            return false;
        };
        match lock(&partition.sender).as_ref() {
            Some(sender) => sender.send(work).is_ok(),
            None => false,
        }
    }

    /// Queues a future on a partition.
    pub fn submit<F>(&self, id: PartitionId, work: F) -> bool
    where
        F: Future<Output = Result<(), WorldError>> + Send + 'static,
    {
        self.queue(id, Box::pin(work))
    }

    /// Runs a future on a partition and waits for its result.
    ///
    /// Must not be awaited from work already running on the same partition:
    /// the partition would wait on itself.
    pub async fn execute<F, T>(&self, id: PartitionId, work: F) -> Result<T, WorldError>
    where
        F: Future<Output = Result<T, WorldError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = self.submit(id, async move {
            let _ = tx.send(work.await);
            Ok(())
        });
        if !queued {
            return Err(WorldError::Internal(format!("partition {id} is not accepting work")));
        }
        rx.await
            .map_err(|_| WorldError::Internal(format!("work on partition {id} was abandoned")))?
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stops accepting work, drains every queue and waits for the consumers.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            debug!("processor shutdown already in progress");
        }
        for partition in &self.partitions {
            lock(&partition.sender).take();
        }

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        let count = workers.len();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("❌ Partition consumer terminated abnormally: {}", e);
            }
        }

        for partition in &self.partitions {
            if let Some(mut receiver) = lock(&partition.receiver).take() {
                receiver.close();
                let mut dropped = 0;
                while receiver.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    warn!(partition = %partition.id, dropped, "processor never started, queued work dropped");
                }
            }
        }
        info!("✅ Partitioned processor drained ({} consumers stopped)", count);
    }
}

async fn run_partition(id: PartitionId, mut receiver: mpsc::UnboundedReceiver<Work>) {
    debug!(partition = %id, "partition consumer running");
    while let Some(work) = receiver.recv().await {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(partition = %id, error = %e, "❌ Partition work failed"),
            Err(_) => error!(partition = %id, "💥 Partition work panicked"),
        }
    }
    debug!(partition = %id, "partition consumer stopped");
}
