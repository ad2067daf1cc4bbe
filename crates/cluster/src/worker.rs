use std::sync::Arc;

use codec_cluster_core::DebugFlags;
use tracing::debug;

use crate::cluster::ClusterShared;
use crate::node::{NodeInner, RunResult};
use crate::thread::ThreadControl;

/// The loop one worker thread runs for the lifetime of its cluster.
///
/// Claim up to `batch_size` nodes, highest priority first, run them in claim
/// order, then park once every queue is empty.
pub(crate) struct Worker {
    cluster: Arc<ClusterShared>,
    control: Arc<ThreadControl>,
    batch: Vec<Arc<NodeInner>>,
    batch_size: usize,
}

impl Worker {
    pub(crate) fn new(cluster: Arc<ClusterShared>, control: Arc<ThreadControl>) -> Self {
        let batch_size = cluster.batch_size();
        Self {
            cluster,
            control,
            batch: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    fn trace(&self, flag: DebugFlags) -> bool {
        self.cluster.debug().contains(flag)
    }

    pub(crate) fn run(mut self) {
        if self.trace(DebugFlags::WORKER) {
            debug!(worker = %self.control.name(), "worker started");
        }

        while !self.control.stop_requested() {
            if self.get_task() > 0 {
                self.run_task();
                continue;
            }

            self.control.set_idle();
            // A producer may have pushed after our scan but before it could
            // see us idle; look again before sleeping.
            if self.cluster.has_queued() {
                if self.control.try_activate() {
                    continue;
                }
                // Lost the race to a producer; its wake is already on the way
            }
            if self.trace(DebugFlags::WORKER) {
                debug!(worker = %self.control.name(), "park");
            }
            self.control.park();
            self.control.stats().record_wake();
        }

        self.control.set_stopped();
        if self.trace(DebugFlags::WORKER) {
            debug!(worker = %self.control.name(), "worker stopped");
        }
    }

    /// Claim nodes into the batch, scanning queues from the highest priority.
    fn get_task(&mut self) -> usize {
        for queue in self.cluster.queues() {
            while self.batch.len() < self.batch_size {
                match queue.claim() {
                    Some(node) => self.batch.push(node),
                    None => break,
                }
            }
            if self.batch.len() == self.batch_size {
                break;
            }
        }
        if !self.batch.is_empty() && self.trace(DebugFlags::FLOW) {
            debug!(worker = %self.control.name(), claimed = self.batch.len(), "batch");
        }
        self.batch.len()
    }

    fn run_task(&mut self) {
        let batch = std::mem::take(&mut self.batch);
        for node in &batch {
            let (result, elapsed) = node.run_work();
            if result != RunResult::Skipped {
                self.control
                    .stats()
                    .record_execution(elapsed, result == RunResult::Failed);
            }
            node.finish_run();
        }
        self.batch = batch;
        self.batch.clear();
    }
}
