//! Wires the node's concurrent activities together: the proxy HTTP
//! server, the downloader worker, the GC tick loop, the filesystem watcher,
//! and the notify-items consumer that turns watcher events into scheduler
//! RPCs. Registration blocks request handling until it first succeeds,
//! retrying indefinitely if the scheduler is unavailable at startup; `route`
//! also checks `NodeState::is_registered` so the invariant holds even if a
//! future change starts the listener before that first registration lands.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

use crate::node::cache_registry::CacheRegistry;
use crate::node::downloader::Downloader;
use crate::node::gc::GarbageCollector;
use crate::node::notifier::{EventKind, Notifier};
use crate::node::proxy::ProxyHandler;
use crate::node::scheduler_client::{ItemOp, SchedulerClient};
use crate::node::state::NodeState;
use crate::scheduler::NodeRecord;

/// Fully resolved node configuration: CLI flags merged over an optional
/// TOML file, per `config::load` and the `node` subcommand.
pub struct NodeConfig {
    pub name: String,
    pub ipv4: String,
    pub scheme: String,
    pub port: u16,
    pub max_connections: u32,
    pub data_dir: PathBuf,
    pub upstream: String,
    pub proxy_regex: String,
    pub scheduler_address: String,
    pub gc_max_atime_age: Duration,
    pub gc_interval: Duration,
    pub gc_max_disk_usage: u64,
}

const DOWNLOAD_QUEUE_CAPACITY: usize = 100;
const NOTIFIER_CHANNEL_CAPACITY: usize = 64;

pub async fn run(config: NodeConfig) -> Result<(), Error> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data directory {:?}", config.data_dir))?;

    let state = Arc::new(NodeState::new());
    let registry = Arc::new(CacheRegistry::new());
    let scheduler = Arc::new(SchedulerClient::new(
        config.scheduler_address.clone(),
        config.name.clone(),
    ));
    let downloader = Arc::new(Downloader::new(
        DOWNLOAD_QUEUE_CAPACITY,
        config.data_dir.join(".tmp"),
        state.clone(),
    ));
    let notifier = Arc::new(Notifier::new(config.data_dir.clone()));
    let gc = Arc::new(GarbageCollector::new(
        config.data_dir.clone(),
        config.gc_max_atime_age,
        config.gc_max_disk_usage,
        registry.clone(),
        state.clone(),
    ));

    let self_record = NodeRecord {
        name: config.name.clone(),
        ipv4: config.ipv4.clone(),
        scheme: config.scheme.clone(),
        port: config.port,
        connections: 0,
        max_connections: config.max_connections,
    };
    scheduler.register_with_retry(&self_record, &state).await;

    {
        let downloader = downloader.clone();
        tokio::spawn(async move { downloader.run(false).await });
    }
    {
        let gc = gc.clone();
        let interval = config.gc_interval;
        tokio::spawn(async move { gc.run(interval, false).await });
    }
    {
        let notifier = notifier.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.run(false).await {
                log::error!("notifier terminated: {}", err);
            }
        });
    }
    {
        let scheduler = scheduler.clone();
        let mut events = notifier.subscribe(NOTIFIER_CHANNEL_CAPACITY).await;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let op = match event.kind {
                    EventKind::Created => ItemOp::Add,
                    EventKind::Removed => ItemOp::Remove,
                    EventKind::Other => continue,
                };
                let fingerprint = crate::Fingerprint::from(event.item);
                scheduler.notify_item(&fingerprint, op).await;
            }
        });
    }

    let handler = Arc::new(ProxyHandler::new(
        &config.proxy_regex,
        config.upstream.clone(),
        config.name.clone(),
        scheduler.clone(),
        downloader.clone(),
        registry.clone(),
        config.data_dir.clone(),
    )?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("invalid node bind address")?;

    let make_svc = make_service_fn(move |_conn| {
        let handler = handler.clone();
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let handler = handler.clone();
                let state = state.clone();
                async move { Ok::<_, Infallible>(route(handler, state, req).await) }
            }))
        }
    });

    log::info!("starting up node {} on {}", self_record.name, addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("node HTTP server failed")
}

/// Splits peer-serving (`GET /{fingerprint}`) from proxy traffic (`/proxy/…`).
/// Anything else is a 404. Requests arriving before the node's first
/// registration has completed get a 503 rather than being served from a
/// still-empty cache or routed to a scheduler that doesn't know us yet.
async fn route(handler: Arc<ProxyHandler>, state: Arc<NodeState>, req: Request<Body>) -> Response<Body> {
    if !state.is_registered() {
        return Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::from("node not yet registered with scheduler"))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    let path = req.uri().path();
    if path.starts_with("/proxy/") {
        return handler.handle(req).await;
    }

    let fingerprint = path.trim_start_matches('/');
    if !fingerprint.is_empty() && req.method() == hyper::Method::GET {
        return handler.serve_by_fingerprint(fingerprint).await;
    }

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
