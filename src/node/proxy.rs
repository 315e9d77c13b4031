//! The request pipeline bound under the proxy prefix.
//!
//! `handle` is the single entry point; everything else is a private step
//! in the decision procedure. Every fallback direction (peer → origin,
//! scheduler-unavailable → pass-through) fails open rather than returning
//! an error to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper::header::ETAG;
use hyper::{Body, Method, Request, Response, StatusCode};
use regex::Regex;

use crate::node::cache_registry::CacheRegistry;
use crate::node::downloader::{DownloadItem, Downloader};
use crate::node::scheduler_client::{RequestContext, SchedulerClient};
use crate::Fingerprint;

const PROXY_PREFIX: &str = "/proxy";

pub struct ProxyHandler {
    regex: Regex,
    upstream_base: String,
    self_name: String,
    client: hyper::Client<hyper::client::HttpConnector>,
    scheduler: Arc<SchedulerClient>,
    downloader: Arc<Downloader>,
    registry: Arc<CacheRegistry>,
    data_dir: PathBuf,
}

fn respond(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static status builds")
}

impl ProxyHandler {
    pub fn new(
        proxy_regex: &str,
        upstream_base: impl Into<String>,
        self_name: impl Into<String>,
        scheduler: Arc<SchedulerClient>,
        downloader: Arc<Downloader>,
        registry: Arc<CacheRegistry>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, anyhow::Error> {
        Ok(ProxyHandler {
            regex: Regex::new(proxy_regex)?,
            upstream_base: upstream_base.into(),
            self_name: self_name.into(),
            client: hyper::Client::new(),
            scheduler,
            downloader,
            registry,
            data_dir: data_dir.into(),
        })
    }

    fn rewritten_path(&self, req: &Request<Body>) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        path_and_query
            .strip_prefix(PROXY_PREFIX)
            .unwrap_or(path_and_query)
            .to_owned()
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let rest = self.rewritten_path(&req);
        let upstream_url = format!("{}{}", self.upstream_base.trim_end_matches('/'), rest);

        if req.method() != Method::GET || !self.regex.is_match(&rest) {
            return self.pass_through(&upstream_url, req, false).await;
        }

        let head_resp = match self.probe(&upstream_url).await {
            Some(resp) => resp,
            None => return self.pass_through(&upstream_url, req, false).await,
        };

        let etag = match head_resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
        {
            Some(etag) => etag.to_owned(),
            None => return self.pass_through(&upstream_url, req, false).await,
        };

        let fingerprint = Fingerprint::compute(&upstream_url, &etag);
        let local_path = self.data_dir.join(fingerprint.as_str());

        if tokio::fs::metadata(&local_path).await.is_ok() {
            let ctx = RequestContext::new();
            match self.scheduler.get_node(&ctx, &self.self_name).await {
                Ok(node) if node.connections + 1 < node.max_connections => {
                    return self.serve_local(&ctx, &fingerprint, &local_path).await;
                }
                Ok(_) => {}
                Err(err) => log::warn!("proxy: fetching own node record failed: {}", err),
            }
            return self.pass_through(&upstream_url, req, false).await;
        }

        let ctx = RequestContext::new();
        match self.scheduler.select_peer(&ctx, &fingerprint).await {
            Ok(Some(peer)) => {
                let peer_url = format!("{}/{}", peer.base_url(), fingerprint);
                self.enqueue_prefetch(&fingerprint, &peer_url, req.headers(), &local_path)
                    .await;
                self.pass_through(&peer_url, req, true).await
            }
            Ok(None) => {
                self.enqueue_prefetch(&fingerprint, &upstream_url, req.headers(), &local_path)
                    .await;
                self.pass_through(&upstream_url, req, false).await
            }
            Err(err) => {
                log::warn!("proxy: select_peer failed: {}", err);
                self.enqueue_prefetch(&fingerprint, &upstream_url, req.headers(), &local_path)
                    .await;
                self.pass_through(&upstream_url, req, false).await
            }
        }
    }

    async fn probe(&self, url: &str) -> Option<Response<Body>> {
        let req = Request::builder()
            .method(Method::HEAD)
            .uri(url)
            .body(Body::empty())
            .ok()?;
        match self.client.request(req).await {
            Ok(resp) if resp.status() == StatusCode::OK || resp.status() == StatusCode::NOT_MODIFIED => {
                Some(resp)
            }
            _ => None,
        }
    }

    async fn pass_through(
        &self,
        target_url: &str,
        req: Request<Body>,
        drop_user_agent: bool,
    ) -> Response<Body> {
        let method = req.method().clone();
        let mut builder = Request::builder().method(method).uri(target_url);
        for (name, value) in req.headers().iter() {
            let lower = name.as_str().to_ascii_lowercase();
            if lower == "host" || (drop_user_agent && lower == "user-agent") {
                continue;
            }
            builder = builder.header(name, value);
        }

        let outgoing = match builder.body(req.into_body()) {
            Ok(outgoing) => outgoing,
            Err(err) => {
                log::warn!("proxy: failed to build pass-through request: {}", err);
                return respond(StatusCode::BAD_GATEWAY);
            }
        };

        match self.client.request(outgoing).await {
            Ok(resp) => resp,
            Err(err) => {
                log::warn!("proxy: pass-through to {} failed: {}", target_url, err);
                respond(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Serves an item by fingerprint for the bare `GET /{fingerprint}` route
    /// that peer redirects land on. Goes through the same connection
    /// accounting and access-time touch as a local cache hit served from
    /// behind the proxy prefix.
    pub async fn serve_by_fingerprint(&self, fingerprint: &str) -> Response<Body> {
        let fingerprint = Fingerprint::from(fingerprint);
        let path = self.data_dir.join(fingerprint.as_str());
        if tokio::fs::metadata(&path).await.is_err() {
            return respond(StatusCode::NOT_FOUND);
        }
        let ctx = RequestContext::new();
        self.serve_local(&ctx, &fingerprint, &path).await
    }

    async fn serve_local(
        &self,
        ctx: &RequestContext,
        fingerprint: &Fingerprint,
        path: &Path,
    ) -> Response<Body> {
        if let Err(err) = self.scheduler.add_connection(ctx).await {
            log::warn!("proxy: add_connection failed: {}", err);
        }
        let result = tokio::fs::read(path).await;
        if let Err(err) = self.scheduler.remove_connection(ctx).await {
            log::warn!("proxy: remove_connection failed: {}", err);
        }

        match result {
            Ok(bytes) => {
                self.registry.touch(fingerprint.as_str(), bytes.len() as u64).await;
                Response::new(Body::from(bytes))
            }
            Err(err) => {
                log::warn!("proxy: reading cached file {} failed: {}", fingerprint, err);
                respond(StatusCode::BAD_GATEWAY)
            }
        }
    }

    async fn enqueue_prefetch(
        &self,
        fingerprint: &Fingerprint,
        source_url: &str,
        headers: &hyper::HeaderMap,
        target_path: &Path,
    ) {
        let item = DownloadItem::new(
            fingerprint.clone(),
            source_url.to_owned(),
            headers,
            target_path.to_path_buf(),
        );
        let outcome = self.downloader.push(item).await;
        log::debug!("proxy: enqueue prefetch for {}: {:?}", fingerprint, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::state::NodeState;

    // Scheduler is never consulted by these cases (bypass happens before any
    // fingerprinting), so a client pointed at an address nothing listens on
    // is enough.
    fn handler(dir: &std::path::Path, regex: &str) -> ProxyHandler {
        ProxyHandler::new(
            regex,
            "http://127.0.0.1:1",
            "node-a",
            Arc::new(SchedulerClient::new("http://127.0.0.1:1", "node-a")),
            Arc::new(Downloader::new(10, dir.join("tmp"), Arc::new(NodeState::new()))),
            Arc::new(CacheRegistry::new()),
            dir,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn rewritten_path_strips_proxy_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), ".*");

        let req = Request::builder()
            .uri("/proxy/images/foo.png")
            .body(Body::empty())
            .unwrap();
        assert_eq!(h.rewritten_path(&req), "/images/foo.png");
    }

    #[tokio::test]
    async fn non_get_method_bypasses_caching() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), ".*");

        let req = Request::builder()
            .method(Method::POST)
            .uri("/proxy/images/foo.png")
            .body(Body::empty())
            .unwrap();
        let resp = h.handle(req).await;
        // Origin is unreachable, so a pass-through attempt degrades to 502
        // rather than ever consulting the cache or scheduler.
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn non_matching_pattern_bypasses_caching() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path(), "^/only-this/");

        let req = Request::builder()
            .uri("/proxy/other/foo.png")
            .body(Body::empty())
            .unwrap();
        let resp = h.handle(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
