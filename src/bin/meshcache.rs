//! Entry point: parses the CLI, merges it with an optional TOML config
//! file, and dispatches to either the scheduler or a node.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;

use meshcache::cli::{Cli, Command, NodeOpts, SchedulerOpts};
use meshcache::config::{self, NodeFileConfig, SchedulerFileConfig};
use meshcache::node::server::NodeConfig;
use meshcache::scheduler::Scheduler;
use meshcache::{logging, node, scheduler};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scheduler(opts) => run_scheduler(opts).await,
        Command::Node(opts) => run_node(opts).await,
    }
}

async fn run_scheduler(opts: SchedulerOpts) -> Result<(), Error> {
    let file: SchedulerFileConfig = config::load(opts.config.as_deref())?;
    logging::init(opts.verbose);

    let address = file.address.unwrap_or(opts.address);
    let storage_type = file.storage_type.unwrap_or(opts.storage_type);
    let algo = file.algo.unwrap_or(opts.algo);
    log::info!(
        "scheduler starting: storage_type={} algo={} (algo is informational only)",
        storage_type,
        algo
    );

    let scheduler = Arc::new(Scheduler::new());
    scheduler::run(scheduler, &address).await
}

async fn run_node(opts: NodeOpts) -> Result<(), Error> {
    let file: NodeFileConfig = config::load(opts.config.as_deref())?;
    logging::init(opts.verbose);

    let name = file
        .name
        .or(opts.name)
        .or_else(hostname)
        .context("node name not given and hostname could not be determined")?;

    let config = NodeConfig {
        name,
        ipv4: file.ipv4.unwrap_or(opts.ipv4),
        scheme: opts.scheme,
        port: file.port.unwrap_or(opts.port),
        max_connections: file.max_conns.unwrap_or(opts.max_conns),
        data_dir: file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or(opts.data_dir),
        upstream: file.upstream.unwrap_or(opts.upstream),
        proxy_regex: file.proxy_regex.unwrap_or(opts.proxy_regex),
        scheduler_address: file.scheduler_address.unwrap_or(opts.scheduler_address),
        gc_max_atime_age: config::parse_duration(
            &file.gc_max_atime_age.unwrap_or(opts.gc_max_atime_age),
        )?,
        gc_interval: config::parse_duration(&file.gc_interval.unwrap_or(opts.gc_interval))?,
        gc_max_disk_usage: config::parse_size(
            &file.gc_max_disk_usage.unwrap_or(opts.gc_max_disk_usage),
        )?,
    };

    if opts.insecure {
        log::warn!("--insecure has no effect: outgoing connections never negotiate TLS");
    }

    node::server::run(config).await
}

fn hostname() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8(output.stdout).ok()?.trim().to_owned())
}
