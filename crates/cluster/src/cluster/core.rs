use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use codec_cluster_core::{ClusterConfig, ClusterError, DebugFlags};
use tracing::{debug, error, info};

use crate::metrics::ClusterMetrics;
use crate::queue::PriorityQueue;
use crate::thread::{write_lock, ThreadControl, WorkerThread};
use crate::types::{ClientType, Priority};
use crate::worker::Worker;

/// State shared by a cluster's workers and every node attached to it.
#[derive(Debug)]
pub(crate) struct ClusterShared {
    /// `{pid}:{client label}`.
    pub(super) name: String,
    pub(super) client: ClientType,
    pub(super) debug: DebugFlags,
    pub(super) batch_size: usize,
    /// One FIFO per priority, index 0 highest.
    pub(super) queues: Vec<PriorityQueue>,
    pub(super) workers: Vec<Arc<ThreadControl>>,
    pub(super) next_node_id: AtomicU32,
    pub(super) node_count: AtomicUsize,
    /// Cleared at teardown. Attach holds the read side for its whole
    /// bind-and-schedule so teardown never races a first enqueue.
    pub(super) accepting: RwLock<bool>,
    /// Set once every worker has been joined.
    pub(super) stopped: AtomicBool,
}

impl ClusterShared {
    pub(crate) fn debug(&self) -> DebugFlags {
        self.debug
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub(crate) fn queues(&self) -> &[PriorityQueue] {
        &self.queues
    }

    pub(crate) fn node_count(&self) -> usize {
        self.node_count.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Refuse further attaches. Waits for attaches already in flight.
    pub(crate) fn close(&self) {
        *write_lock(&self.accepting) = false;
    }

    pub(crate) fn node_detached(&self) {
        self.node_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn metrics(&self) -> ClusterMetrics {
        let queued: HashMap<Priority, usize> = self
            .queues
            .iter()
            .map(|q| (q.priority(), q.len()))
            .collect();
        ClusterMetrics {
            cluster: self.name.clone(),
            client: self.client,
            node_count: self.node_count(),
            nodes_attached: self.next_node_id.load(Ordering::SeqCst),
            queued,
            workers: self.workers.iter().map(|w| w.snapshot()).collect(),
        }
    }
}

/// A worker pool plus its priority queues, serving one client type.
///
/// Dropping the cluster stops and joins every worker. All nodes must have
/// been detached by then.
#[derive(Debug)]
pub(crate) struct Cluster {
    shared: Arc<ClusterShared>,
    threads: Vec<WorkerThread>,
}

impl Cluster {
    /// Create the queues and start `config.thread_count` workers.
    pub(crate) fn new(pid: u32, client: ClientType, config: &ClusterConfig) -> Result<Self, ClusterError> {
        let name = format!("{}:{}", pid, client.label());
        let queues = Priority::ALL
            .iter()
            .map(|&p| PriorityQueue::new(p, config.debug))
            .collect();
        let workers: Vec<Arc<ThreadControl>> = (0..config.thread_count)
            .map(|i| ThreadControl::new(format!("{}:w{}", name, i)))
            .collect();

        let shared = Arc::new(ClusterShared {
            name,
            client,
            debug: config.debug,
            batch_size: config.batch_size,
            queues,
            workers,
            next_node_id: AtomicU32::new(0),
            node_count: AtomicUsize::new(0),
            accepting: RwLock::new(true),
            stopped: AtomicBool::new(false),
        });

        // Threads already started are stopped and joined by their Drop if a
        // later spawn fails
        let mut threads = Vec::with_capacity(shared.workers.len());
        for control in &shared.workers {
            let mut thread = WorkerThread::new(Arc::clone(control));
            let worker = Worker::new(Arc::clone(&shared), Arc::clone(control));
            thread.start(move || worker.run())?;
            threads.push(thread);
        }

        info!(
            cluster = %shared.name,
            workers = threads.len(),
            batch_size = shared.batch_size,
            debug = %shared.debug,
            "Cluster started"
        );
        Ok(Self { shared, threads })
    }

    pub(crate) fn shared(&self) -> &Arc<ClusterShared> {
        &self.shared
    }

    pub(crate) fn client(&self) -> ClientType {
        self.shared.client
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shared.close();
        for thread in &self.threads {
            thread.request_stop();
        }
        for thread in &mut self.threads {
            thread.join();
        }
        self.shared.stopped.store(true, Ordering::SeqCst);

        let remaining = self.shared.node_count();
        if remaining > 0 {
            error!(cluster = %self.shared.name, nodes = remaining, "Cluster torn down with nodes still attached");
        }
        if !thread::panicking() {
            for queue in &self.shared.queues {
                assert!(
                    queue.is_empty(),
                    "cluster {} torn down with {} nodes queued at {}",
                    self.shared.name,
                    queue.len(),
                    queue.priority()
                );
            }
        }
        if self.shared.debug.contains(DebugFlags::WORKER) {
            debug!(cluster = %self.shared.name, "workers joined");
        }
        info!(
            cluster = %self.shared.name,
            nodes_attached = self.shared.next_node_id.load(Ordering::SeqCst),
            "Cluster stopped"
        );
    }
}
