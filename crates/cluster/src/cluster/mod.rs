//! Per-client-type clusters.
//!
//! Split into focused submodules:
//! - `core`: shared cluster state, worker pool startup and teardown
//! - `scheduling`: attach, enqueue and worker wake-up
//! - `tests`: end-to-end scheduling through a single cluster

mod core;
mod scheduling;
#[cfg(test)]
mod tests;

pub(crate) use self::core::{Cluster, ClusterShared};
