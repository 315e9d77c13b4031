//! Command-line interface: one binary, two subcommands.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "meshcache", about = "P2P caching tier in front of an HTTP origin")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Run the coordinator that tracks node state and item placement.
    Scheduler(SchedulerOpts),
    /// Run a data-plane proxy/cache node.
    Node(NodeOpts),
}

#[derive(Parser, Debug)]
pub struct SchedulerOpts {
    /// Optional TOML config file; CLI flags override its values.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the scheduler HTTP API to.
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub address: String,

    /// Storage backend for the node registry/item index. Only `memory` ships.
    #[clap(long, default_value = "memory")]
    pub storage_type: String,

    /// Peer-selection algorithm. Informational only; least-connections is
    /// the only one implemented.
    #[clap(long, default_value = "least-connections")]
    pub algo: String,

    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct NodeOpts {
    /// Optional TOML config file; CLI flags override its values.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Unique node name, must be alphanumeric. Defaults to the hostname.
    #[clap(long)]
    pub name: Option<String>,

    #[clap(long)]
    pub ipv4: String,

    #[clap(long, default_value = "http")]
    pub scheme: String,

    #[clap(long)]
    pub port: u16,

    #[clap(long, default_value = "10")]
    pub max_conns: u32,

    #[clap(long)]
    pub data_dir: PathBuf,

    /// Upstream origin to proxy to, e.g. `http://origin.example.com`.
    #[clap(long)]
    pub upstream: String,

    /// Skip TLS certificate verification when talking to the upstream/peers.
    #[clap(long)]
    pub insecure: bool,

    /// Regex matching request URIs eligible for caching.
    #[clap(long, default_value = ".*")]
    pub proxy_regex: String,

    #[clap(long)]
    pub scheduler_address: String,

    #[clap(long, default_value = "24h")]
    pub gc_max_atime_age: String,

    #[clap(long, default_value = "60s")]
    pub gc_interval: String,

    #[clap(long, default_value = "10G")]
    pub gc_max_disk_usage: String,

    #[clap(short, long)]
    pub verbose: bool,
}
