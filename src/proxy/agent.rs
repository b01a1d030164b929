use crate::error::{Result, SpProxyError};
use reqwest::redirect::Policy;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

const TCP_KEEP_ALIVE: Duration = Duration::from_secs(60);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

static SHARED_AGENT: OnceLock<KeepAliveAgent> = OnceLock::new();

/// Pooled HTTPS client reused by every https proxy route.
///
/// Certificate verification is disabled: targets are usually on-premises
/// SharePoint farms with self-signed certificates.
#[derive(Clone, Debug)]
pub struct KeepAliveAgent {
    inner: Arc<AgentInner>,
}

#[derive(Debug)]
struct AgentInner {
    client: reqwest::Client,
    reject_unauthorized: bool,
}

impl KeepAliveAgent {
    /// Process-wide agent, created on first use
    pub fn shared() -> Result<Self> {
        if let Some(agent) = SHARED_AGENT.get() {
            return Ok(agent.clone());
        }

        let agent = Self::build()?;
        Ok(SHARED_AGENT.get_or_init(|| agent).clone())
    }

    fn build() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .tcp_keepalive(TCP_KEEP_ALIVE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(|e| SpProxyError::Internal(format!("Failed to create keep-alive agent: {}", e)))?;

        info!("Created shared keep-alive agent");

        Ok(Self {
            inner: Arc::new(AgentInner {
                client,
                reject_unauthorized: false,
            }),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    /// Whether invalid upstream certificates are rejected
    pub fn rejects_unauthorized(&self) -> bool {
        self.inner.reject_unauthorized
    }

    /// True when both handles point at the same connection pool
    pub fn shares_pool_with(&self, other: &KeepAliveAgent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
