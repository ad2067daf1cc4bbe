use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use codec_cluster_core::DebugFlags;
use tracing::debug;

use crate::node::NodeInner;
use crate::thread::lock;
use crate::types::Priority;

/// FIFO of nodes waiting for a worker at one priority level.
///
/// The list is only touched under its own lock. `count` mirrors the list
/// length so workers and producers can check for work without locking.
#[derive(Debug)]
pub(crate) struct PriorityQueue {
    priority: Priority,
    nodes: Mutex<VecDeque<Arc<NodeInner>>>,
    count: AtomicUsize,
    debug: DebugFlags,
}

impl PriorityQueue {
    pub(crate) fn new(priority: Priority, debug: DebugFlags) -> Self {
        Self {
            priority,
            nodes: Mutex::new(VecDeque::new()),
            count: AtomicUsize::new(0),
            debug,
        }
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a node that has just moved to WAIT.
    pub(crate) fn push(&self, node: Arc<NodeInner>) {
        let mut nodes = lock(&self.nodes);
        if self.debug.contains(DebugFlags::LOCK) {
            debug!(queue = %self.priority, node = %node.name(), len = nodes.len(), "push");
        }
        nodes.push_back(node);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove a specific node wherever it sits in the list.
    pub(crate) fn remove(&self, node: &NodeInner) -> bool {
        let mut nodes = lock(&self.nodes);
        let Some(pos) = nodes.iter().position(|n| std::ptr::eq(Arc::as_ptr(n), node)) else {
            return false;
        };
        nodes.remove(pos);
        self.count.fetch_sub(1, Ordering::SeqCst);
        if self.debug.contains(DebugFlags::LOCK) {
            debug!(queue = %self.priority, node = %node.name(), len = nodes.len(), "remove");
        }
        true
    }

    /// Pop the head node and move it WAIT → RUN while still holding the lock.
    pub(crate) fn claim(&self) -> Option<Arc<NodeInner>> {
        if self.is_empty() {
            return None;
        }
        let mut nodes = lock(&self.nodes);
        let count = self.count.load(Ordering::SeqCst);
        if count == 0 {
            return None;
        }
        let node = nodes.pop_front();
        assert!(
            node.is_some(),
            "queue {} counts {} nodes but its list is empty",
            self.priority,
            count
        );
        let node = node?;
        node.start_run();
        self.count.fetch_sub(1, Ordering::SeqCst);
        if self.debug.contains(DebugFlags::LOCK) {
            debug!(queue = %self.priority, node = %node.name(), len = nodes.len(), "claim");
        }
        Some(node)
    }
}
