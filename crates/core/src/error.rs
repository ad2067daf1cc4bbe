use thiserror::Error;

/// Caller-input errors reported by the cluster scheduler.
///
/// None of these leave partial state behind: the operation that returned
/// the error did not touch any node, queue or cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Priority {0} out of range")]
    InvalidPriority(u8),

    #[error("Client type {0} out of range")]
    InvalidClient(usize),

    #[error("Node already attached: {0}")]
    AlreadyAttached(String),

    #[error("Cluster registry has been shut down")]
    RegistryClosed,

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("Config error: {0}")]
    Config(String),
}
