use std::fmt;

use codec_cluster_core::ClusterError;
use serde::{Deserialize, Serialize};

/// Number of priority levels per cluster.
pub const MAX_PRIORITY: usize = 4;

/// Number of client categories the registry can hold a cluster for.
pub const MAX_CLIENT_TYPES: usize = 16;

/// Cluster-scoped node identifier.
pub type NodeId = u32;

/// Node priority. Lower numeric value = served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Priority {
    /// Latency critical, e.g. low-delay encode channels.
    P0 = 0,
    /// Regular realtime channels.
    P1 = 1,
    /// Throughput channels that tolerate queueing.
    P2 = 2,
    /// Background work such as transcoding backlogs.
    P3 = 3,
}

impl Priority {
    pub const ALL: [Priority; MAX_PRIORITY] = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];

    /// Index into a cluster's queue array.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Priority {
    type Error = ClusterError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::P0),
            1 => Ok(Priority::P1),
            2 => Ok(Priority::P2),
            3 => Ok(Priority::P3),
            other => Err(ClusterError::InvalidPriority(other)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.index())
    }
}

/// Client category a cluster serves. Each category gets its own cluster,
/// queues and worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ClientType(u8);

impl ClientType {
    pub const DECODER: ClientType = ClientType(0);
    pub const ENCODER: ClientType = ClientType(1);
    pub const JPEG_DECODER: ClientType = ClientType(2);
    pub const JPEG_ENCODER: ClientType = ClientType(3);
    pub const POST_PROCESSOR: ClientType = ClientType(4);

    /// Validate a raw category index.
    pub fn new(index: usize) -> Result<Self, ClusterError> {
        if index < MAX_CLIENT_TYPES {
            Ok(ClientType(index as u8))
        } else {
            Err(ClusterError::InvalidClient(index))
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Short label used in cluster, worker and node names.
    pub fn label(self) -> String {
        match self {
            ClientType::DECODER => "dec".to_string(),
            ClientType::ENCODER => "enc".to_string(),
            ClientType::JPEG_DECODER => "jpegd".to_string(),
            ClientType::JPEG_ENCODER => "jpege".to_string(),
            ClientType::POST_PROCESSOR => "pp".to_string(),
            ClientType(other) => format!("client{}", other),
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
