use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use codec_cluster::{
    ClientType, ClusterMetrics, ClusterRegistry, Node, NodeStats, Priority, ScheduleOutcome,
    Trigger, MAX_PRIORITY,
};

/// Outcome counts across all producers.
#[derive(Debug, Default, Serialize)]
pub struct ScheduleCounts {
    pub queued: u64,
    pub pending: u64,
    pub signalled: u64,
    pub ignored: u64,
}

impl ScheduleCounts {
    fn record(&mut self, outcome: ScheduleOutcome) {
        match outcome {
            ScheduleOutcome::Queued => self.queued += 1,
            ScheduleOutcome::Pending => self.pending += 1,
            ScheduleOutcome::Signalled => self.signalled += 1,
            ScheduleOutcome::Ignored => self.ignored += 1,
        }
    }

    fn merge(&mut self, other: &ScheduleCounts) {
        self.queued += other.queued;
        self.pending += other.pending;
        self.signalled += other.signalled;
        self.ignored += other.ignored;
    }

    pub fn total(&self) -> u64 {
        self.queued + self.pending + self.signalled + self.ignored
    }
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub schedules: ScheduleCounts,
    /// Runs observed by the work functions themselves.
    pub runs: u64,
    pub node_stats: NodeStats,
    pub clusters: Vec<ClusterMetrics>,
}

pub struct BenchPlan {
    pub clients: usize,
    pub nodes: usize,
    pub producers: usize,
    pub duration: Duration,
    pub work: Duration,
}

fn simulated_node(work: Duration, runs: &Arc<AtomicU64>) -> Node {
    let runs = Arc::clone(runs);
    Node::with_work(move |_t: &Trigger| {
        let started = Instant::now();
        while started.elapsed() < work {
            std::hint::spin_loop();
        }
        runs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })
}

/// Attach nodes, schedule them from producer threads for the planned
/// duration, then detach everything and collect metrics.
pub fn run(registry: &ClusterRegistry, plan: &BenchPlan) -> Result<BenchReport> {
    anyhow::ensure!(plan.clients > 0 && plan.nodes > 0, "bench needs at least one client and one node");
    let started_at = Utc::now();
    let started = Instant::now();
    let runs = Arc::new(AtomicU64::new(0));

    let mut nodes = Vec::with_capacity(plan.clients * plan.nodes);
    for c in 0..plan.clients {
        let client = ClientType::new(c).context("invalid client count")?;
        for n in 0..plan.nodes {
            let priority = Priority::try_from((n % MAX_PRIORITY) as u8)?;
            let node = simulated_node(plan.work, &runs);
            registry
                .attach(&node, client, priority)
                .with_context(|| format!("attaching node {} to {}", n, client))?;
            nodes.push(node);
        }
    }
    info!(nodes = nodes.len(), clients = plan.clients, "Nodes attached");

    let stop = Arc::new(AtomicBool::new(false));
    let producers: Vec<_> = (0..plan.producers)
        .map(|p| {
            let triggers: Vec<Trigger> = nodes.iter().map(Node::trigger).collect();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("producer-{}", p))
                .spawn(move || {
                    let mut counts = ScheduleCounts::default();
                    let mut i = p;
                    while !stop.load(Ordering::Relaxed) {
                        counts.record(triggers[i % triggers.len()].schedule());
                        i = i.wrapping_add(plan_stride(triggers.len()));
                    }
                    counts
                })
                .context("spawning producer")
        })
        .collect::<Result<_>>()?;

    thread::sleep(plan.duration);
    stop.store(true, Ordering::Relaxed);

    let mut schedules = ScheduleCounts::default();
    for producer in producers {
        match producer.join() {
            Ok(counts) => schedules.merge(&counts),
            Err(_) => anyhow::bail!("producer thread panicked"),
        }
    }
    debug!(schedules = schedules.total(), "Producers stopped");

    let mut node_stats = NodeStats::default();
    for node in nodes {
        let stats = node.detach();
        node_stats.runs += stats.runs;
        node_stats.failures += stats.failures;
        node_stats.run_time += stats.run_time;
    }

    Ok(BenchReport {
        started_at,
        elapsed: started.elapsed(),
        schedules,
        runs: runs.load(Ordering::Relaxed),
        node_stats,
        clusters: registry.all_metrics(),
    })
}

/// Step through the trigger list with a stride coprime to its length so
/// each producer visits every node.
fn plan_stride(len: usize) -> usize {
    let mut stride = 7;
    while len > 1 && gcd(stride, len) != 1 {
        stride += 1;
    }
    stride
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec_cluster::ClusterConfig;

    #[test]
    fn stride_is_coprime() {
        assert_eq!(plan_stride(1), 7);
        assert_eq!(plan_stride(8), 7);
        assert_eq!(plan_stride(14), 9);
        assert_eq!(gcd(plan_stride(21), 21), 1);
    }

    #[test]
    fn short_bench_runs_every_node() {
        let registry = ClusterRegistry::new(ClusterConfig::default().with_thread_count(2));
        let plan = BenchPlan {
            clients: 2,
            nodes: 4,
            producers: 2,
            duration: Duration::from_millis(30),
            work: Duration::from_micros(10),
        };
        let report = run(&registry, &plan).unwrap();

        assert!(report.runs >= 8);
        assert_eq!(report.runs, report.node_stats.runs);
        assert_eq!(report.node_stats.failures, 0);
        assert_eq!(report.clusters.len(), 2);
        assert!(report.clusters.iter().all(|c| c.node_count == 0));
        assert_eq!(report.schedules.ignored, 0);
    }
}
