use crate::error::{Result, SpProxyError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use moka::future::Cache;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::resolver::AuthOptions;

const DEFAULT_CACHE_CAPACITY: u64 = 100;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Headers that authenticate a request against a SharePoint site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResult {
    pub headers: HashMap<String, String>,
}

impl AuthResult {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }

    /// Look up a header, exact name first, then ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// Produces auth headers for a site
#[async_trait]
pub trait SharePointAuth: Send + Sync {
    async fn get_auth(&self, site_url: &Url, options: &AuthOptions) -> Result<AuthResult>;
}

/// Provider for credential shapes that need no handshake with SharePoint.
///
/// Static `headers` from the options win. Otherwise username and password
/// become a Basic `Authorization` header, prefixed with the domain when set.
#[derive(Debug, Clone, Default)]
pub struct CredentialsAuth;

impl CredentialsAuth {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SharePointAuth for CredentialsAuth {
    async fn get_auth(&self, site_url: &Url, options: &AuthOptions) -> Result<AuthResult> {
        if !options.headers.is_empty() {
            debug!(site = %site_url, count = options.headers.len(), "Using static auth headers");
            return Ok(AuthResult::new(options.headers.clone()));
        }

        match (&options.username, &options.password) {
            (Some(username), Some(password)) => {
                let user = match &options.domain {
                    Some(domain) => format!("{}\\{}", domain, username),
                    None => username.clone(),
                };
                let token = STANDARD.encode(format!("{}:{}", user, password.expose_secret()));

                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), format!("Basic {}", token));
                Ok(AuthResult::new(headers))
            }
            _ if options.client_id.is_some() || options.adfs_url.is_some() => {
                Err(SpProxyError::UnsupportedStrategy(format!(
                    "token-based sign-in for {} needs a dedicated provider",
                    site_url
                )))
            }
            _ => Err(SpProxyError::MissingCredentials),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct AuthCacheKey {
    site_url: String,
    principal: String,
    fingerprint: [u8; 32],
}

impl AuthCacheKey {
    fn new(site_url: &Url, options: &AuthOptions) -> Self {
        Self {
            site_url: site_url.to_string(),
            principal: options.principal(),
            fingerprint: credentials_fingerprint(options),
        }
    }
}

/// SHA-256 over every option that changes the issued headers, so an edited
/// config file never hits a stale entry
fn credentials_fingerprint(options: &AuthOptions) -> [u8; 32] {
    fn field(hasher: &mut Sha256, value: Option<&str>) {
        match value {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    let mut hasher = Sha256::new();
    field(&mut hasher, options.username.as_deref());
    field(&mut hasher, options.domain.as_deref());
    field(&mut hasher, options.client_id.as_deref());
    field(&mut hasher, options.password.as_ref().map(|p| p.expose_secret().as_str()));
    field(
        &mut hasher,
        options.client_secret.as_ref().map(|s| s.expose_secret().as_str()),
    );
    field(&mut hasher, options.realm.as_deref());
    field(&mut hasher, options.adfs_url.as_deref());
    field(&mut hasher, options.relying_party.as_deref());
    for flag in [options.fba, options.tmg, options.ondemand] {
        hasher.update([flag.map_or(0u8, |f| 1 + f as u8)]);
    }

    let headers: BTreeMap<&String, &String> = options.headers.iter().collect();
    hasher.update((headers.len() as u64).to_be_bytes());
    for (name, value) in headers {
        field(&mut hasher, Some(name.as_str()));
        field(&mut hasher, Some(value.as_str()));
    }

    hasher.finalize().into()
}

/// Caches results of an inner provider per site and credentials
pub struct CachedAuth<P> {
    inner: P,
    cache: Arc<Cache<AuthCacheKey, AuthResult>>,
}

impl<P: SharePointAuth> CachedAuth<P> {
    pub fn new(inner: P) -> Self {
        Self::with_settings(inner, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_settings(inner: P, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        info!(
            max_capacity = max_capacity,
            ttl_secs = ttl.as_secs(),
            "Initialized auth cache"
        );

        Self {
            inner,
            cache: Arc::new(cache),
        }
    }

    pub async fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl<P: SharePointAuth> SharePointAuth for CachedAuth<P> {
    async fn get_auth(&self, site_url: &Url, options: &AuthOptions) -> Result<AuthResult> {
        let key = AuthCacheKey::new(site_url, options);

        if let Some(cached) = self.cache.get(&key).await {
            debug!(site = %key.site_url, principal = %key.principal, "Auth cache hit");
            return Ok(cached);
        }

        let result = self.inner.get_auth(site_url, options).await?;
        self.cache.insert(key, result.clone()).await;
        Ok(result)
    }
}
