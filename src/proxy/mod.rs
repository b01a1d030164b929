pub mod agent;
pub mod mutator;

use crate::auth::RequestAuth;
use crate::config::ProxyRouteConfig;
use crate::error::{Result, SpProxyError};
use axum::{
    body::Body,
    extract::State,
    http::{header::HOST, HeaderMap, Method, Request, Response},
    Extension,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Proxy handler state for one route
#[derive(Clone)]
pub struct ProxyState {
    pub route: Arc<ProxyRouteConfig>,
    pub client: reqwest::Client,
    pub upstream_timeout: Option<Duration>,
}

impl ProxyState {
    /// Create proxy state, reusing the route's keep-alive agent when it has one
    pub fn new(route: ProxyRouteConfig, upstream_timeout: Option<Duration>) -> Result<Self> {
        let client = match route.agent() {
            Some(agent) => agent.client().clone(),
            None => reqwest::Client::builder()
                .danger_accept_invalid_certs(!route.secure())
                .redirect(Policy::none())
                .build()
                .map_err(|e| SpProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?,
        };

        Ok(Self {
            route: Arc::new(route),
            client,
            upstream_timeout,
        })
    }
}

/// Forward a request to the route target, running the route's auth hook first
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    auth: Option<Extension<RequestAuth>>,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    let auth = auth.map(|Extension(auth)| auth);
    let target_url = build_target_url(state.route.target(), &path, query.as_deref());
    let mut headers = forwardable_headers(req.headers(), state.route.change_origin());

    if let Some(on_proxy_req) = state.route.on_proxy_req() {
        let Some(auth) = &auth else {
            warn!(path = %path, "Proxy reached without auth context");
            return Err(SpProxyError::MissingAuthContext(path));
        };
        on_proxy_req(&mut headers, auth, state.route.origin())?;
    }

    let request_id = auth.as_ref().map_or("-", |a| a.request_id.as_str());
    debug!(
        request_id = %request_id,
        target = %target_url,
        strategy = ?auth.as_ref().map(|a| &a.strategy),
        "Forwarding request"
    );

    let body_bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| SpProxyError::Proxy(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let response = send_request(
        &state.client,
        method.clone(),
        headers,
        body_bytes,
        &target_url,
        state.upstream_timeout,
    )
    .await;

    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    match &response {
        Ok(resp) => info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %resp.status(),
            latency_ms = latency_ms,
            "Request completed"
        ),
        Err(e) => warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            error = %e,
            latency_ms = latency_ms,
            "Request failed"
        ),
    }

    response
}

/// Join the route target with the incoming path and query
fn build_target_url(target: &Url, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", target.as_str().trim_end_matches('/'), path);
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }
    url
}

/// Incoming headers minus hop-by-hop headers, and minus `Host` when the
/// upstream host comes from the target
fn forwardable_headers(incoming: &HeaderMap, change_origin: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming.iter() {
        if is_hop_by_hop_header(name.as_str()) || (change_origin && name == HOST) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Send request to the SharePoint site
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    target_url: &str,
    timeout: Option<Duration>,
) -> Result<Response<Body>> {
    let mut upstream_req = client
        .request(method, target_url)
        .headers(headers)
        .body(body_bytes);

    if let Some(timeout) = timeout {
        upstream_req = upstream_req.timeout(timeout);
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            SpProxyError::Timeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            SpProxyError::Backend(format!("Failed to connect to SharePoint: {}", e))
        } else {
            SpProxyError::Proxy(format!("Upstream request failed: {}", e))
        }
    })?;

    let status = upstream_response.status();
    let mut response_builder = Response::builder().status(status);

    // Copy response headers
    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| SpProxyError::Backend(format!("Failed to read upstream response: {}", e)))?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| SpProxyError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
