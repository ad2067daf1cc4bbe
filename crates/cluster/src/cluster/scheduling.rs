use std::sync::atomic::Ordering;
use std::sync::Arc;

use codec_cluster_core::{ClusterError, DebugFlags};
use tracing::debug;

use crate::node::{Binding, NodeInner};
use crate::thread::read_lock;
use crate::types::Priority;

use super::ClusterShared;

impl ClusterShared {
    /// Bind `node` to this cluster at `priority` and give it its first run.
    ///
    /// Fails with `RegistryClosed` once teardown has begun, leaving the node
    /// unattached.
    pub(crate) fn attach(self: &Arc<Self>, node: &Arc<NodeInner>, priority: Priority) -> Result<(), ClusterError> {
        let accepting = read_lock(&self.accepting);
        if !*accepting {
            return Err(ClusterError::RegistryClosed);
        }
        node.bind(|| {
            let id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
            Binding {
                cluster: Arc::clone(self),
                id,
                name: format!("{}:{}", self.name, id),
                priority,
            }
        })?;
        self.node_count.fetch_add(1, Ordering::SeqCst);
        node.schedule();
        drop(accepting);
        Ok(())
    }

    /// Append a node that just moved to WAIT.
    pub(crate) fn enqueue(&self, node: Arc<NodeInner>, priority: Priority) {
        self.queues[priority.index()].push(node);
    }

    /// Pull a node back off its queue. Only used once the workers are gone.
    pub(crate) fn dequeue(&self, node: &NodeInner, priority: Priority) -> bool {
        self.queues[priority.index()].remove(node)
    }

    /// Whether any queue holds a node.
    pub(crate) fn has_queued(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    /// Wake at most one idle worker. Busy workers rescan the queues before
    /// parking, so nothing is lost when all of them are running.
    pub(crate) fn wake_one(&self) {
        for worker in &self.workers {
            if worker.wake_if_idle() {
                if self.debug.contains(DebugFlags::WORKER) {
                    debug!(worker = %worker.name(), "wake");
                }
                return;
            }
        }
    }
}
