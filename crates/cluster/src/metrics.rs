use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::thread::WorkerState;
use crate::types::{ClientType, Priority};

/// Per-worker execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerMetrics {
    /// Worker name, `{cluster}:w{id}`.
    pub name: String,
    /// Activity at snapshot time.
    pub state: WorkerState,
    /// Work function invocations.
    pub runs: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
    /// Times the worker was woken from park.
    pub wakes: u64,
    /// Average work function duration.
    pub avg_run_time: Duration,
    /// Last invocation time.
    pub last_run: Option<DateTime<Utc>>,
}

impl WorkerMetrics {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: WorkerState::Running,
            runs: 0,
            failures: 0,
            wakes: 0,
            avg_run_time: Duration::ZERO,
            last_run: None,
        }
    }

    /// Record a work function invocation.
    pub(crate) fn record_execution(&mut self, duration: Duration, failed: bool) {
        self.runs += 1;
        if failed {
            self.failures += 1;
        }
        self.last_run = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_run_time = if self.runs == 1 {
            duration
        } else {
            let prev_nanos = self.avg_run_time.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.runs as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub(crate) fn record_wake(&mut self) {
        self.wakes += 1;
    }
}

/// Snapshot of one cluster, exposed for diagnostics only.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMetrics {
    /// Cluster name, `{pid}:{client}`.
    pub cluster: String,
    pub client: ClientType,
    /// Nodes currently attached.
    pub node_count: usize,
    /// Nodes ever attached (next node id).
    pub nodes_attached: u32,
    /// Nodes waiting per priority level.
    pub queued: HashMap<Priority, usize>,
    pub workers: Vec<WorkerMetrics>,
}

impl ClusterMetrics {
    /// Total nodes waiting across all levels.
    pub fn total_queued(&self) -> usize {
        self.queued.values().sum()
    }

    /// Total work function invocations across all workers.
    pub fn total_runs(&self) -> u64 {
        self.workers.iter().map(|w| w.runs).sum()
    }
}

/// Cumulative statistics for a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Work function invocations.
    pub runs: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
    /// Time spent inside the work function.
    pub run_time: Duration,
}
