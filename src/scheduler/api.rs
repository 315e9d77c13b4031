//! The scheduler's HTTP API, versioned under `/v1`.
//!
//! Routing is done by hand against `(method, path-segments)` rather than
//! through a router crate — the endpoint table is small and fixed, and
//! keeping it inline makes the method/path/effect mapping easy to
//! read straight off the match arms.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};

use crate::scheduler::{NodeRecord, Scheduler};
use crate::Fingerprint;

/// The `{ "status", "message"?, "node"? }` envelope every response is wrapped in.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulerEnvelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeRecord>,
}

impl SchedulerEnvelope {
    fn success(message: impl Into<String>) -> Self {
        SchedulerEnvelope {
            status: "success".into(),
            message: Some(message.into()),
            node: None,
        }
    }

    fn success_with_node(node: NodeRecord) -> Self {
        SchedulerEnvelope {
            status: "success".into(),
            message: None,
            node: Some(node),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        SchedulerEnvelope {
            status: "error".into(),
            message: Some(message.into()),
            node: None,
        }
    }
}

fn respond(status: StatusCode, body: SchedulerEnvelope) -> Response<Body> {
    let payload = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(payload))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn request_id(req: &Request<Body>) -> String {
    req.headers()
        .get("X-Request-Id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned()
}

async fn dispatch(scheduler: Arc<Scheduler>, req: Request<Body>) -> Response<Body> {
    let rid = request_id(&req);
    let method = req.method().clone();
    let segments: Vec<String> = req
        .uri()
        .path()
        .trim_matches('/')
        .split('/')
        .map(String::from)
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    log::debug!("request-id={} {} {}", rid, method, req.uri().path());

    let result = match (&method, segments.as_slice()) {
        (&Method::POST, ["v1", "nodes"]) => register_node(&scheduler, req).await,
        (&Method::GET, ["v1", "nodes", name]) => get_node(&scheduler, name).await,
        (&Method::POST, ["v1", "connections", name]) => add_connection(&scheduler, name).await,
        (&Method::DELETE, ["v1", "connections", name]) => {
            remove_connection(&scheduler, name).await
        }
        (&Method::PUT, ["v1", "connections", name, n]) => {
            set_connections(&scheduler, name, n).await
        }
        (&Method::POST, ["v1", "items", fp, name]) => add_item_node(&scheduler, fp, name).await,
        (&Method::DELETE, ["v1", "items", fp, name]) => {
            remove_item_node(&scheduler, fp, name).await
        }
        (&Method::GET, ["v1", "peers", fp]) => select_peer(&scheduler, fp).await,
        _ => Ok(respond(
            StatusCode::NOT_FOUND,
            SchedulerEnvelope::error("no such route"),
        )),
    };

    result.unwrap_or_else(|err| {
        respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            SchedulerEnvelope::error(err.to_string()),
        )
    })
}

async fn register_node(scheduler: &Scheduler, req: Request<Body>) -> Result<Response<Body>, Error> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .context("reading request body")?;
    let node: NodeRecord = match serde_json::from_slice(&bytes) {
        Ok(node) => node,
        Err(_) => {
            return Ok(respond(
                StatusCode::BAD_REQUEST,
                SchedulerEnvelope::error("malformed payload"),
            ))
        }
    };

    match scheduler.register_node(node).await {
        Ok(()) => Ok(respond(
            StatusCode::OK,
            SchedulerEnvelope::success("node registered"),
        )),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

async fn get_node(scheduler: &Scheduler, name: &str) -> Result<Response<Body>, Error> {
    match scheduler.get_node(name).await {
        Ok(node) => Ok(respond(StatusCode::OK, SchedulerEnvelope::success_with_node(node))),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

async fn add_connection(scheduler: &Scheduler, name: &str) -> Result<Response<Body>, Error> {
    match scheduler.add_connection(name).await {
        Ok(()) => Ok(respond(
            StatusCode::OK,
            SchedulerEnvelope::success("1 connection added"),
        )),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

async fn remove_connection(scheduler: &Scheduler, name: &str) -> Result<Response<Body>, Error> {
    match scheduler.remove_connection(name).await {
        Ok(()) => Ok(respond(
            StatusCode::OK,
            SchedulerEnvelope::success("1 connection removed"),
        )),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

async fn set_connections(
    scheduler: &Scheduler,
    name: &str,
    n: &str,
) -> Result<Response<Body>, Error> {
    let n: u32 = match n.parse() {
        Ok(n) => n,
        Err(_) => {
            return Ok(respond(
                StatusCode::BAD_REQUEST,
                SchedulerEnvelope::error("invalid connections value"),
            ))
        }
    };

    match scheduler.set_connections(name, n).await {
        Ok(()) => Ok(respond(
            StatusCode::OK,
            SchedulerEnvelope::success("connections set"),
        )),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

async fn add_item_node(
    scheduler: &Scheduler,
    fp: &str,
    name: &str,
) -> Result<Response<Body>, Error> {
    let fp: Fingerprint = Fingerprint::from(fp);
    scheduler
        .add_item_node(&fp, name)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(respond(
        StatusCode::OK,
        SchedulerEnvelope::success("item registered for node"),
    ))
}

async fn remove_item_node(
    scheduler: &Scheduler,
    fp: &str,
    name: &str,
) -> Result<Response<Body>, Error> {
    let fp: Fingerprint = Fingerprint::from(fp);
    scheduler
        .remove_item_node(&fp, name)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(respond(
        StatusCode::OK,
        SchedulerEnvelope::success("item removed for node"),
    ))
}

async fn select_peer(scheduler: &Scheduler, fp: &str) -> Result<Response<Body>, Error> {
    let fp: Fingerprint = Fingerprint::from(fp);
    match scheduler.select_peer(&fp).await {
        Ok(node) => Ok(respond(StatusCode::OK, SchedulerEnvelope::success_with_node(node))),
        Err(err) => Ok(respond(
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            SchedulerEnvelope::error(err.to_string()),
        )),
    }
}

/// Binds an ephemeral listener and serves the dispatch table on it,
/// returning the bound address. Lets other modules' tests drive a real
/// scheduler over HTTP instead of only against `dispatch` directly.
#[cfg(test)]
pub(crate) async fn spawn_test_server(scheduler: Arc<Scheduler>) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let make_svc = make_service_fn(move |_conn| {
        let scheduler = scheduler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let scheduler = scheduler.clone();
                async move { Ok::<_, Infallible>(dispatch(scheduler, req).await) }
            }))
        }
    });
    let server = Server::bind(&addr).serve(make_svc);
    let local_addr = server.local_addr();
    tokio::spawn(server);
    local_addr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeRecord {
        NodeRecord {
            name: name.to_owned(),
            ipv4: "127.0.0.1".to_owned(),
            scheme: "http".to_owned(),
            port: 8000,
            connections: 0,
            max_connections: 10,
        }
    }

    fn req(method: Method, path: &str, body: Option<Vec<u8>>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap()
    }

    async fn envelope(resp: Response<Body>) -> (StatusCode, SchedulerEnvelope) {
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let scheduler = Arc::new(Scheduler::new());
        let (status, body) = envelope(dispatch(scheduler, req(Method::GET, "/v1/nope", None)).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn register_node_with_malformed_payload_is_400() {
        let scheduler = Arc::new(Scheduler::new());
        let (status, body) = envelope(
            dispatch(scheduler, req(Method::POST, "/v1/nodes", Some(b"not json".to_vec()))).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn register_node_with_invalid_record_maps_to_validation_status() {
        let scheduler = Arc::new(Scheduler::new());
        let mut bad = node("node1");
        bad.port = 0;
        let payload = serde_json::to_vec(&bad).unwrap();
        let (status, body) = envelope(
            dispatch(scheduler, req(Method::POST, "/v1/nodes", Some(payload))).await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn select_peer_with_unknown_fingerprint_is_404_not_500() {
        let scheduler = Arc::new(Scheduler::new());
        let (status, body) =
            envelope(dispatch(scheduler, req(Method::GET, "/v1/peers/deadbeef", None)).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn get_unregistered_node_is_500_per_status_mapping() {
        let scheduler = Arc::new(Scheduler::new());
        let (status, body) =
            envelope(dispatch(scheduler, req(Method::GET, "/v1/nodes/ghost", None)).await).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, "error");
    }

    #[tokio::test]
    async fn register_then_get_round_trips_through_the_http_layer() {
        let scheduler = Arc::new(Scheduler::new());
        let payload = serde_json::to_vec(&node("node1")).unwrap();
        let (status, _) = envelope(
            dispatch(scheduler.clone(), req(Method::POST, "/v1/nodes", Some(payload))).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            envelope(dispatch(scheduler, req(Method::GET, "/v1/nodes/node1", None)).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "success");
        assert_eq!(body.node.unwrap().name, "node1");
    }
}

/// Binds and runs the scheduler HTTP API until the process is terminated.
pub async fn run(scheduler: Arc<Scheduler>, address: &str) -> Result<(), Error> {
    let addr: SocketAddr = address.parse().context("invalid --address")?;

    let make_svc = make_service_fn(move |_conn| {
        let scheduler = scheduler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let scheduler = scheduler.clone();
                async move { Ok::<_, Infallible>(dispatch(scheduler, req).await) }
            }))
        }
    });

    log::info!("starting up scheduler on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("scheduler HTTP server failed")
}
