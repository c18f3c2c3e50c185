// src/main.rs
// Line-topology OLSR simulation printing each node's routing table

use std::path::PathBuf;
use std::process;

use clap::Parser;
use olsr_rs::config::InterfaceConfig;
use olsr_rs::sim::{Simulator, line_address};
use olsr_rs::{OlsrConfig, Time};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, fmt};

/// Simulate a chain of OLSR nodes and print the routes they converge on
#[derive(Parser, Debug)]
#[command(name = "olsr-sim", version, about)]
struct Args {
    /// Number of nodes in the chain
    #[arg(short, long, default_value_t = 5)]
    nodes: usize,

    /// Simulated run time in seconds
    #[arg(short, long, default_value_t = 30)]
    seconds: i64,

    /// Seed for emission jitter
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// JSON config used as a template for every node (interfaces are replaced)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let template = match &args.config {
        Some(path) => match OlsrConfig::load_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded config template");
                config
            }
            Err(e) => {
                error!("Failed to load configuration from {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => OlsrConfig::new(),
    };

    let mut sim = match Simulator::line(args.nodes, args.seed, |i, _| {
        let mut config = template.clone();
        config.interfaces = vec![InterfaceConfig {
            index: 1,
            address: line_address(i),
        }];
        config.main_interface = None;
        config.excluded_interfaces.clear();
        config
    }) {
        Ok(sim) => sim,
        Err(e) => {
            error!("Failed to build simulation: {}", e);
            process::exit(1);
        }
    };

    info!(nodes = args.nodes, seconds = args.seconds, "running simulation");
    sim.run_until(Time::from_secs(args.seconds));

    let stats = sim.stats();
    println!(
        "t={} sent={} delivered={} rejected={}",
        sim.now(),
        stats.packets_sent,
        stats.packets_delivered,
        stats.receive_errors
    );
    for node in sim.nodes() {
        println!("\n{} (MPRs: {:?})", node.main_address(), node.mpr_set());
        for entry in node.routing_table_entries() {
            println!("  {}", entry.summary());
        }
        for route in node.network_routes() {
            println!("  {}", route.summary());
        }
    }
}
