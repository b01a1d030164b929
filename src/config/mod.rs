use crate::error::{Result, SpProxyError};
use crate::proxy::agent::KeepAliveAgent;
use crate::proxy::mutator::{apply_auth_headers, OnProxyReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Route prefix the auth middleware and proxy route are mounted at
pub const API_PREFIX: &str = "/_api";

/// SharePoint site configuration read from the JSON config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Absolute URL of the SharePoint site
    pub site_url: String,
    /// Auth-provider specific fields, kept opaque here
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SiteConfig {
    /// Load site configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpProxyError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse site configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SpProxyError::Config(format!("Failed to parse config: {}", e)))?;
        config.url()?;
        Ok(config)
    }

    /// Parsed site URL. Only absolute http and https URLs are accepted.
    pub fn url(&self) -> Result<Url> {
        parse_site_url(&self.site_url)
    }

    /// Whether the site is served over TLS
    pub fn is_https(&self) -> bool {
        self.url().map(|u| u.scheme() == "https").unwrap_or(false)
    }
}

pub(crate) fn parse_site_url(site_url: &str) -> Result<Url> {
    let url = Url::parse(site_url)
        .map_err(|e| SpProxyError::InvalidSiteUrl(format!("{}: {}", site_url, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SpProxyError::InvalidSiteUrl(format!(
            "{}: unsupported scheme '{}'",
            site_url, other
        ))),
    }
}

/// Listener and timeout settings for the dev server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Ceiling for context resolution plus auth fetch, unset means no limit
    #[serde(default)]
    pub auth_timeout_secs: Option<u64>,
    /// Ceiling for the upstream SharePoint request, unset means no limit
    #[serde(default)]
    pub upstream_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_timeout_secs: None,
            upstream_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// Build server settings from `SP_PROXY_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("SP_PROXY_HOST") {
            config.host = host;
        }
        if let Some(port) = env_number("SP_PROXY_PORT")? {
            config.port = port;
        }
        config.auth_timeout_secs = env_number("SP_PROXY_AUTH_TIMEOUT_SECS")?;
        config.upstream_timeout_secs = env_number("SP_PROXY_UPSTREAM_TIMEOUT_SECS")?;

        Ok(config)
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout_secs.map(Duration::from_secs)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs.map(Duration::from_secs)
    }

    /// Address to bind, as `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SpProxyError::Config(format!("{} must be a number, got '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Immutable proxy settings for one route prefix
#[derive(Debug, Clone)]
pub struct ProxyRouteConfig {
    target: Url,
    origin: String,
    secure: bool,
    change_origin: bool,
    agent: Option<KeepAliveAgent>,
    on_proxy_req: Option<OnProxyReq>,
}

impl ProxyRouteConfig {
    /// Build the route config that forwards to the given site
    pub fn for_site(site: &SiteConfig) -> Result<Self> {
        let target = site.url()?;
        let agent = if target.scheme() == "https" {
            Some(KeepAliveAgent::shared()?)
        } else {
            None
        };

        Ok(Self {
            target,
            origin: site.site_url.clone(),
            secure: false,
            change_origin: true,
            agent,
            on_proxy_req: Some(apply_auth_headers),
        })
    }

    /// Plain forwarding route with no auth hook. Certificates are verified
    /// and the incoming `Host` is kept.
    pub fn forward_to(target: Url) -> Self {
        Self {
            origin: target.as_str().trim_end_matches('/').to_string(),
            target,
            secure: true,
            change_origin: false,
            agent: None,
            on_proxy_req: None,
        }
    }

    /// Upstream site the route forwards to
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Value written to the `Origin` header of every proxied request
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether upstream TLS certificates are verified
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Whether the upstream `Host` is taken from the target
    pub fn change_origin(&self) -> bool {
        self.change_origin
    }

    /// Shared keep-alive agent, only set for https targets
    pub fn agent(&self) -> Option<&KeepAliveAgent> {
        self.agent.as_ref()
    }

    /// Hook run on the outgoing request before it is forwarded. Routes with
    /// a hook only forward requests that carry an auth context.
    pub fn on_proxy_req(&self) -> Option<OnProxyReq> {
        self.on_proxy_req
    }
}

/// Proxy routes keyed by path prefix
pub type ProxyConfigMap = BTreeMap<String, ProxyRouteConfig>;

/// Read the site config file and produce the `/_api` proxy route
pub fn get_proxy_config<P: AsRef<Path>>(file_path: P) -> Result<ProxyConfigMap> {
    let site = SiteConfig::from_file(file_path)?;
    let route = ProxyRouteConfig::for_site(&site)?;

    debug!(
        target = %route.target(),
        keep_alive = route.agent().is_some(),
        "Built proxy route"
    );

    let mut map = ProxyConfigMap::new();
    map.insert(API_PREFIX.to_string(), route);
    Ok(map)
}
