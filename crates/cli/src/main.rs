mod bench;
mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use codec_cluster::{ClusterConfig, ClusterRegistry, DebugFlags};
use codec_cluster_core::config::load_dotenv;

use crate::bench::{BenchPlan, BenchReport};
use crate::cli::CliArgs;

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut config = ClusterConfig::from_env();
    if let Some(threads) = args.threads {
        config = config.with_thread_count(threads);
    }
    if let Some(batch) = args.batch {
        config = config.with_batch_size(batch);
    }
    if let Some(mask) = args.debug.as_deref() {
        let debug: DebugFlags = mask.parse().context("--debug")?;
        config = config.with_debug(debug);
    }
    config.log_summary();

    let plan = BenchPlan {
        clients: args.clients,
        nodes: args.nodes,
        producers: args.producers,
        duration: Duration::from_millis(args.duration_ms),
        work: Duration::from_micros(args.work_us),
    };

    let registry = ClusterRegistry::new(config);
    let report = bench::run(&registry, &plan)?;

    if args.json {
        let output = serde_json::json!({
            "config": registry.config().summary(),
            "report": &report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report);
    }
    registry.shutdown();
    info!(elapsed = ?report.elapsed, "Bench complete");
    Ok(())
}

fn print_report(report: &BenchReport) {
    println!("started:   {}", report.started_at.to_rfc3339());
    println!("elapsed:   {:?}", report.elapsed);
    println!(
        "schedules: {} (queued {}, pending {}, signalled {}, ignored {})",
        report.schedules.total(),
        report.schedules.queued,
        report.schedules.pending,
        report.schedules.signalled,
        report.schedules.ignored
    );
    println!(
        "runs:      {} ({} failed, {:?} in work)",
        report.runs, report.node_stats.failures, report.node_stats.run_time
    );
    for cluster in &report.clusters {
        println!("cluster {}: {} nodes attached", cluster.cluster, cluster.nodes_attached);
        for worker in &cluster.workers {
            println!(
                "  {:<16} runs {:>8}  wakes {:>6}  avg {:?}",
                worker.name, worker.runs, worker.wakes, worker.avg_run_time
            );
        }
    }
}
