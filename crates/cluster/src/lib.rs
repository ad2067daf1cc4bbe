//! Cluster task scheduler for codec channels.
//!
//! Each client type (decoder, encoder, ...) gets a cluster: a small pool of
//! worker threads serving four FIFO priority queues. Channels own a [`Node`],
//! attach it through the [`ClusterRegistry`] and call
//! [`schedule`](Node::schedule) whenever they have work. A node never runs on
//! two workers at once, repeated schedules collapse into a single pending
//! run, and [`Node::detach`] returns only once the node can no longer run.

mod cluster;
pub mod metrics;
pub mod node;
mod queue;
pub mod registry;
pub mod state;
pub mod task;
mod thread;
pub mod types;
mod worker;

pub use codec_cluster_core::{ClusterConfig, ClusterError, DebugFlags};
pub use metrics::{ClusterMetrics, NodeStats, WorkerMetrics};
pub use node::{Node, ScheduleOutcome, Trigger};
pub use registry::ClusterRegistry;
pub use state::NodeState;
pub use task::{Work, WorkError};
pub use thread::WorkerState;
pub use types::{ClientType, NodeId, Priority, MAX_CLIENT_TYPES, MAX_PRIORITY};
