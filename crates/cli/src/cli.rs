use clap::Parser;

/// Load generator for the codec cluster scheduler.
///
/// Attaches simulated channel nodes to one cluster per client type, hammers
/// them with schedules from producer threads, then detaches everything and
/// reports per-cluster metrics.
#[derive(Parser, Debug)]
#[command(name = "cluster-bench", version, about)]
pub struct CliArgs {
    /// Number of client types (clusters) to exercise
    #[arg(long, env = "CLUSTER_BENCH_CLIENTS", default_value_t = 2)]
    pub clients: usize,

    /// Nodes attached per client type
    #[arg(long, env = "CLUSTER_BENCH_NODES", default_value_t = 8)]
    pub nodes: usize,

    /// Producer threads scheduling nodes
    #[arg(long, env = "CLUSTER_BENCH_PRODUCERS", default_value_t = 2)]
    pub producers: usize,

    /// How long producers keep scheduling, in milliseconds
    #[arg(long, env = "CLUSTER_BENCH_DURATION_MS", default_value_t = 1000)]
    pub duration_ms: u64,

    /// Simulated work per run, in microseconds
    #[arg(long, default_value_t = 50)]
    pub work_us: u64,

    /// Worker threads per cluster (overrides CLUSTER_THREAD_COUNT)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Nodes a worker claims per pass (overrides CLUSTER_BATCH_SIZE)
    #[arg(long)]
    pub batch: Option<usize>,

    /// Debug mask, hex or decimal (overrides CLUSTER_DEBUG)
    #[arg(long)]
    pub debug: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}
