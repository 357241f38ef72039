//! Proxying requests to the node that owns a session.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;
use bytes::Bytes;
use mesh_core::error::ForwardErrorCode;
use mesh_core::{Error, Result};
use session::ForwardTarget;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, warn};
use url::Url;

/// Marks a request already proxied once; carries the forwarding node id.
pub const FORWARDED_BY_HEADER: &str = "x-session-mesh-forwarded-by";

/// Connection-scoped headers that never cross a proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Whether `headers` show the request was already forwarded by a peer.
pub fn was_forwarded(headers: &HeaderMap) -> bool {
    headers.contains_key(FORWARDED_BY_HEADER)
}

/// Streams requests through to owner nodes.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    node_id: String,
}

impl Forwarder {
    pub fn new(node_id: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            node_id: node_id.into(),
        })
    }

    /// Sends the request to `target` and streams the upstream response back
    /// without buffering its body.
    pub async fn forward(
        &self,
        target: &ForwardTarget,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        if was_forwarded(headers) {
            metrics().forward_errors.inc();
            return Err(Error::forward(
                ForwardErrorCode::LoopDetected,
                format!(
                    "request already forwarded; refusing to forward again to {}",
                    target.owner_node
                ),
            ));
        }

        let url = target_url(&target.address, uri)?;
        let mut outbound = HeaderMap::with_capacity(headers.len() + 1);
        for (name, value) in headers {
            if *name == header::HOST || *name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
                continue;
            }
            outbound.append(name.clone(), value.clone());
        }
        if let Ok(value) = HeaderValue::from_str(&self.node_id) {
            outbound.insert(FORWARDED_BY_HEADER, value);
        }

        debug!(owner = %target.owner_node, url = %url, method = %method, "Forwarding request");

        let start = Instant::now();
        let upstream = self
            .client
            .request(method, url)
            .headers(outbound)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                metrics().forward_errors.inc();
                warn!(owner = %target.owner_node, error = %e, "Owner node unreachable");
                Error::forward(
                    ForwardErrorCode::Unreachable,
                    format!("owner node {} unreachable: {}", target.owner_node, e),
                )
            })?;

        metrics()
            .forward_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        metrics().requests_forwarded.inc();

        let mut response = Response::builder().status(upstream.status());
        if let Some(out) = response.headers_mut() {
            for (name, value) in upstream.headers() {
                if *name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
                    continue;
                }
                out.append(name.clone(), value.clone());
            }
        }

        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| Error::internal(format!("Failed to build proxied response: {}", e)))
    }
}

/// Joins the owner's base URL with the inbound path and query.
fn target_url(address: &str, uri: &Uri) -> Result<Url> {
    let mut url = Url::parse(address).map_err(|e| {
        Error::forward(
            ForwardErrorCode::UnknownOwner,
            format!("invalid owner address {}: {}", address, e),
        )
    })?;

    let base_path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}{}", base_path, uri.path()));
    url.set_query(uri.query());
    Ok(url)
}
