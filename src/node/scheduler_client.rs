//! Thin typed client for the scheduler API.
//!
//! Every call attaches `Content-Type: application/json` and an
//! `X-Request-Id`; the request id comes from a [`RequestContext`], which is
//! either propagated from a caller or minted fresh. Background work uses
//! [`RequestContext::detached`] so it doesn't inherit a request's id once
//! that request has already returned.

use std::time::Duration;

use anyhow::{bail, Context, Error};
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use uuid::Uuid;

use crate::scheduler::{NodeRecord, SchedulerEnvelope};
use crate::Fingerprint;

/// Carries the request id threaded through a chain of scheduler calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext {
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// A fresh root context for work that outlives its triggering request
    /// (prefetch downloads), deliberately breaking the propagation chain.
    pub fn detached() -> Self {
        Self::new()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What the notify-items driver turns a filesystem event into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOp {
    Add,
    Remove,
}

#[derive(Clone)]
pub struct SchedulerClient {
    http: Client<HttpConnector>,
    scheduler_address: String,
    self_name: String,
}

impl SchedulerClient {
    pub fn new(scheduler_address: impl Into<String>, self_name: impl Into<String>) -> Self {
        SchedulerClient {
            http: Client::new(),
            scheduler_address: scheduler_address.into(),
            self_name: self_name.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.scheduler_address.trim_end_matches('/'), path)
    }

    /// Makes the HTTP call and returns the raw status alongside the
    /// envelope, without judging success — callers that care about a
    /// specific status (`select_peer`'s 404) inspect it directly instead of
    /// parsing the error message text.
    async fn call(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, SchedulerEnvelope), Error> {
        let body = body.map(Body::from).unwrap_or_else(Body::empty);
        let req = Request::builder()
            .method(method)
            .uri(self.url(path))
            .header("Content-Type", "application/json")
            .header("X-Request-Id", ctx.request_id())
            .body(body)
            .context("building scheduler request")?;

        let resp = self.http.request(req).await.context("calling scheduler")?;
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .context("reading scheduler response")?;
        let envelope: SchedulerEnvelope =
            serde_json::from_slice(&bytes).context("decoding scheduler response")?;
        Ok((status, envelope))
    }

    /// Turns a `(status, envelope)` pair into a `Result`, treating 304 as
    /// success alongside the envelope's own `status` field.
    fn require_success(path: &str, status: StatusCode, envelope: SchedulerEnvelope) -> Result<SchedulerEnvelope, Error> {
        if envelope.status == "success" || status == StatusCode::NOT_MODIFIED {
            Ok(envelope)
        } else {
            bail!(
                "scheduler call to {} failed: {}",
                path,
                envelope.message.unwrap_or_default()
            )
        }
    }

    /// Registers this node with the scheduler, retrying forever on a fixed
    /// ~2s backoff until the first success. Only used at startup; a node
    /// already running never re-registers on its own.
    pub async fn register_with_retry(&self, node: &NodeRecord, state: &crate::node::NodeState) {
        let body = serde_json::to_vec(node).expect("NodeRecord always serializes");
        loop {
            let ctx = RequestContext::new();
            let attempt = match self.call(&ctx, Method::POST, "/v1/nodes", Some(body.clone())).await {
                Ok((status, envelope)) => Self::require_success("/v1/nodes", status, envelope),
                Err(err) => Err(err),
            };
            match attempt {
                Ok(_) => {
                    state.mark_registered();
                    log::info!("node registration completed");
                    return;
                }
                Err(err) => {
                    log::warn!("registration attempt failed: {}, retrying", err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    pub async fn get_node(&self, ctx: &RequestContext, name: &str) -> Result<NodeRecord, Error> {
        let path = format!("/v1/nodes/{}", name);
        let (status, envelope) = self.call(ctx, Method::GET, &path, None).await?;
        let envelope = Self::require_success(&path, status, envelope)?;
        envelope.node.context("scheduler response missing node")
    }

    pub async fn add_connection(&self, ctx: &RequestContext) -> Result<(), Error> {
        let path = format!("/v1/connections/{}", self.self_name);
        let (status, envelope) = self.call(ctx, Method::POST, &path, None).await?;
        Self::require_success(&path, status, envelope)?;
        Ok(())
    }

    pub async fn remove_connection(&self, ctx: &RequestContext) -> Result<(), Error> {
        let path = format!("/v1/connections/{}", self.self_name);
        let (status, envelope) = self.call(ctx, Method::DELETE, &path, None).await?;
        Self::require_success(&path, status, envelope)?;
        Ok(())
    }

    pub async fn set_connections(&self, ctx: &RequestContext, n: u32) -> Result<(), Error> {
        let path = format!("/v1/connections/{}/{}", self.self_name, n);
        let (status, envelope) = self.call(ctx, Method::PUT, &path, None).await?;
        Self::require_success(&path, status, envelope)?;
        Ok(())
    }

    pub async fn add_item_node(&self, ctx: &RequestContext, fp: &Fingerprint) -> Result<(), Error> {
        let path = format!("/v1/items/{}/{}", fp, self.self_name);
        let (status, envelope) = self.call(ctx, Method::POST, &path, None).await?;
        Self::require_success(&path, status, envelope)?;
        Ok(())
    }

    pub async fn remove_item_node(
        &self,
        ctx: &RequestContext,
        fp: &Fingerprint,
    ) -> Result<(), Error> {
        let path = format!("/v1/items/{}/{}", fp, self.self_name);
        let (status, envelope) = self.call(ctx, Method::DELETE, &path, None).await?;
        Self::require_success(&path, status, envelope)?;
        Ok(())
    }

    /// Returns `Ok(None)` for the "no peer available" 404 case rather than
    /// an error, judged from the HTTP status `call` observed rather than
    /// from the error message text.
    pub async fn select_peer(
        &self,
        ctx: &RequestContext,
        fp: &Fingerprint,
    ) -> Result<Option<NodeRecord>, Error> {
        let path = format!("/v1/peers/{}", fp);
        let (status, envelope) = self.call(ctx, Method::GET, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope = Self::require_success(&path, status, envelope)?;
        Ok(envelope.node)
    }

    /// Turns a notifier event into the corresponding scheduler RPC.
    /// Unknown event kinds are dropped with a warning.
    pub async fn notify_item(&self, fp: &Fingerprint, op: ItemOp) {
        let ctx = RequestContext::detached();
        let result = match op {
            ItemOp::Add => self.add_item_node(&ctx, fp).await,
            ItemOp::Remove => self.remove_item_node(&ctx, fp).await,
        };
        if let Err(err) = result {
            log::warn!("failed to notify scheduler of item {}: {}", fp, err);
        }
    }
}
