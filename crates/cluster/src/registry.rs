//! Process-wide table of clusters, one per client type.
//!
//! The registry is an ordinary value: create one at startup, share it by
//! reference (or `Arc`) and call [`shutdown`](ClusterRegistry::shutdown) or
//! drop it on exit. Clusters are created lazily on the first attach for
//! their client type.

use std::sync::{Arc, Mutex};

use codec_cluster_core::{ClusterConfig, ClusterError};
use tracing::info;

use crate::cluster::{Cluster, ClusterShared};
use crate::metrics::ClusterMetrics;
use crate::node::Node;
use crate::thread::lock;
use crate::types::{ClientType, Priority, MAX_CLIENT_TYPES};

#[derive(Debug)]
struct RegistryInner {
    clusters: Vec<Option<Cluster>>,
    closed: bool,
}

/// Owner of every cluster in the process.
#[derive(Debug)]
pub struct ClusterRegistry {
    config: ClusterConfig,
    pid: u32,
    inner: Mutex<RegistryInner>,
}

impl ClusterRegistry {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            pid: std::process::id(),
            inner: Mutex::new(RegistryInner {
                clusters: (0..MAX_CLIENT_TYPES).map(|_| None).collect(),
                closed: false,
            }),
        }
    }

    /// Registry configured from `CLUSTER_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(ClusterConfig::from_env())
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Attach `node` to the cluster for `client` at `priority`.
    ///
    /// Creates the cluster (and starts its workers) if this is the first
    /// node of that client type. The node runs once right after attaching.
    pub fn attach(&self, node: &Node, client: ClientType, priority: Priority) -> Result<(), ClusterError> {
        if node.is_attached() {
            return Err(ClusterError::AlreadyAttached(
                node.name().unwrap_or_default().to_string(),
            ));
        }
        let shared = self.cluster_for(client)?;
        shared.attach(node.inner(), priority)
    }

    /// Look up or create the cluster for `client`.
    fn cluster_for(&self, client: ClientType) -> Result<Arc<ClusterShared>, ClusterError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(ClusterError::RegistryClosed);
        }
        let slot = &mut inner.clusters[client.index()];
        if let Some(cluster) = slot {
            return Ok(Arc::clone(cluster.shared()));
        }
        let cluster = Cluster::new(self.pid, client, &self.config)?;
        let shared = Arc::clone(cluster.shared());
        *slot = Some(cluster);
        Ok(shared)
    }

    /// Snapshot of the cluster serving `client`, if it exists.
    pub fn metrics(&self, client: ClientType) -> Option<ClusterMetrics> {
        let inner = lock(&self.inner);
        inner.clusters[client.index()]
            .as_ref()
            .map(|c| c.shared().metrics())
    }

    /// Snapshots of every live cluster.
    pub fn all_metrics(&self) -> Vec<ClusterMetrics> {
        let inner = lock(&self.inner);
        inner
            .clusters
            .iter()
            .flatten()
            .map(|c| c.shared().metrics())
            .collect()
    }

    /// Number of clusters created so far and not yet torn down.
    pub fn cluster_count(&self) -> usize {
        lock(&self.inner).clusters.iter().flatten().count()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    /// Tear down every cluster. Further attaches fail with
    /// [`ClusterError::RegistryClosed`]. Calling this again is a no-op.
    ///
    /// Every node must be detached first.
    pub fn shutdown(&self) {
        let clusters: Vec<Cluster> = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.clusters.iter_mut().filter_map(Option::take).collect()
        };

        let count = clusters.len();
        for cluster in clusters {
            info!(client = %cluster.client(), "Tearing down cluster");
            drop(cluster);
        }
        info!(clusters = count, "Cluster registry shut down");
    }
}

impl Drop for ClusterRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
