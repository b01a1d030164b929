use crate::config::parse_site_url;
use crate::error::{Result, SpProxyError};
use crate::secrets::{deserialize_optional_secret, is_secret_ref, resolve_secret_ref, SecretString};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::strategy::AuthStrategy;

const SITE_URL_KEY: &str = "siteUrl";
const STRATEGY_KEY: &str = "strategy";
const AUTH_OPTIONS_KEY: &str = "authOptions";

/// Credential fields for a SharePoint site.
///
/// Which fields are set decides the [`AuthStrategy`]. Secret fields accept
/// `env://` and `file://` references.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub password: Option<SecretString>,
    pub domain: Option<String>,
    pub workstation: Option<String>,
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub client_secret: Option<SecretString>,
    pub realm: Option<String>,
    pub issuer_id: Option<String>,
    pub rsa_private_key_path: Option<String>,
    pub sha_thumbprint: Option<String>,
    pub relying_party: Option<String>,
    pub adfs_url: Option<String>,
    pub adfs_cookie: Option<String>,
    pub fba: Option<bool>,
    pub tmg: Option<bool>,
    pub ondemand: Option<bool>,
    /// Pre-captured headers sent as-is
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Provider-specific fields this crate does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthOptions {
    /// Identity used to tell cached credentials apart
    pub fn principal(&self) -> String {
        match (&self.domain, &self.username, &self.client_id) {
            (Some(domain), Some(user), _) => format!("{}\\{}", domain, user),
            (None, Some(user), _) => user.clone(),
            (_, None, Some(client_id)) => client_id.clone(),
            _ => "anonymous".to_string(),
        }
    }

    fn resolve_secret_refs(&mut self, warn_plaintext: bool) -> Result<()> {
        for (field, slot) in [
            ("password", &mut self.password),
            ("clientSecret", &mut self.client_secret),
        ] {
            let Some(raw) = slot.as_ref().map(|s| s.expose_secret().clone()) else {
                continue;
            };

            if is_secret_ref(&raw) {
                *slot = Some(resolve_secret_ref(&raw)?);
            } else if warn_plaintext {
                warn!(
                    field = field,
                    "Plaintext secret in auth config, use an env:// or file:// reference instead"
                );
            }
        }
        Ok(())
    }
}

/// Fully resolved auth settings for one site
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub site_url: Url,
    pub auth_options: AuthOptions,
    pub strategy: AuthStrategy,
}

/// Options controlling how a resolver treats the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Keep secrets out of the file in plain text
    pub encrypt_password: bool,
    /// Write resolved values back to the config file
    pub save_config_on_disk: bool,
}

impl ResolverOptions {
    /// Options the auth middleware resolves with
    pub fn persistent() -> Self {
        Self {
            encrypt_password: true,
            save_config_on_disk: true,
        }
    }
}

/// Source of the auth context for a site
#[async_trait]
pub trait AuthConfigResolver: Send + Sync {
    /// Resolve site URL, auth options and strategy
    async fn get_context(&self) -> Result<AuthContext>;
}

/// Resolver backed by the JSON config file. The file is re-read on every call.
#[derive(Debug, Clone)]
pub struct FileAuthConfigResolver {
    config_path: PathBuf,
    options: ResolverOptions,
    /// Held while the detected strategy is written back
    persist_lock: Arc<Mutex<()>>,
}

impl FileAuthConfigResolver {
    pub fn new<P: AsRef<Path>>(config_path: P, options: ResolverOptions) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            options,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let content = tokio::fs::read_to_string(&self.config_path).await.map_err(|e| {
            SpProxyError::Config(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        match serde_json::from_str::<serde_json::Value>(&content)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(SpProxyError::Config(format!(
                "Config file {} must contain a JSON object",
                self.config_path.display()
            ))),
        }
    }

    /// Write the detected strategy into the config file unless another
    /// request already did.
    ///
    /// The file is replaced through a rename so concurrent readers see either
    /// the old or the new content, never a truncated file.
    async fn persist_strategy(&self, strategy: &AuthStrategy) -> Result<()> {
        let _guard = self.persist_lock.lock().await;

        let mut document = self.read_document().await?;
        if document.contains_key(STRATEGY_KEY) {
            debug!(path = %self.config_path.display(), "Auth strategy already saved");
            return Ok(());
        }

        document.insert(
            STRATEGY_KEY.to_string(),
            serde_json::Value::String(strategy.to_string()),
        );
        let content = serde_json::to_string_pretty(&serde_json::Value::Object(document))?;

        let staging = self.staging_path();
        tokio::fs::write(&staging, content).await?;
        if let Err(e) = tokio::fs::rename(&staging, &self.config_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        info!(
            path = %self.config_path.display(),
            strategy = %strategy,
            "Saved detected auth strategy to config"
        );
        Ok(())
    }

    /// Sibling of the config file, so the rename stays on one filesystem
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .config_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.config_path.with_file_name(name)
    }
}

#[async_trait]
impl AuthConfigResolver for FileAuthConfigResolver {
    async fn get_context(&self) -> Result<AuthContext> {
        let document = self.read_document().await?;

        let site_url = document
            .get(SITE_URL_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SpProxyError::Config("siteUrl is missing from config".to_string()))?;
        let site_url = parse_site_url(site_url)?;

        // Options live under `authOptions`, older files keep them at the top level
        let options_value = match document.get(AUTH_OPTIONS_KEY) {
            Some(value) => value.clone(),
            None => {
                let mut top_level = document.clone();
                top_level.remove(SITE_URL_KEY);
                top_level.remove(STRATEGY_KEY);
                serde_json::Value::Object(top_level)
            }
        };
        let mut auth_options: AuthOptions = serde_json::from_value(options_value)
            .map_err(|e| SpProxyError::AuthResolve(format!("Invalid auth options: {}", e)))?;
        auth_options.resolve_secret_refs(self.options.encrypt_password)?;

        let explicit = document
            .get(STRATEGY_KEY)
            .and_then(|v| v.as_str())
            .map(AuthStrategy::from);

        let strategy = match explicit {
            Some(strategy) => strategy,
            None => {
                let detected = AuthStrategy::detect(&site_url, &auth_options)
                    .ok_or(SpProxyError::MissingCredentials)?;
                debug!(strategy = %detected, "Detected auth strategy");

                if self.options.save_config_on_disk {
                    if let Err(e) = self.persist_strategy(&detected).await {
                        warn!(error = %e, "Failed to save auth config");
                    }
                }
                detected
            }
        };

        Ok(AuthContext {
            site_url,
            auth_options,
            strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    #[tokio::test]
    async fn test_resolve_explicit_strategy() {
        let file = write_config(
            r#"{
                "siteUrl": "https://sp.contoso.local/sites/dev",
                "strategy": "OnpremiseUserCredentials",
                "authOptions": { "username": "dev", "password": "secret", "domain": "CONTOSO" }
            }"#,
        );

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        let context = resolver.get_context().await.unwrap();

        assert_eq!(context.site_url.as_str(), "https://sp.contoso.local/sites/dev");
        assert_eq!(context.strategy, AuthStrategy::OnpremiseUserCredentials);
        assert_eq!(context.auth_options.principal(), "CONTOSO\\dev");
        assert_eq!(
            context.auth_options.password.as_ref().unwrap().expose_secret(),
            "secret"
        );
    }

    #[tokio::test]
    async fn test_top_level_options() {
        let file = write_config(
            r#"{
                "siteUrl": "https://contoso.sharepoint.com",
                "clientId": "abc",
                "clientSecret": "xyz"
            }"#,
        );

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        let context = resolver.get_context().await.unwrap();

        assert_eq!(context.strategy, AuthStrategy::OnlineAddinOnly);
        assert_eq!(context.auth_options.principal(), "abc");
    }

    #[tokio::test]
    async fn test_detected_strategy_is_saved() {
        let file = write_config(
            r#"{
                "siteUrl": "https://sp.contoso.local",
                "authOptions": { "username": "dev", "password": "secret", "domain": "CONTOSO" }
            }"#,
        );

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::persistent());
        let context = resolver.get_context().await.unwrap();
        assert_eq!(context.strategy, AuthStrategy::OnpremiseUserCredentials);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(saved["strategy"], "OnpremiseUserCredentials");
        assert_eq!(saved["siteUrl"], "https://sp.contoso.local");
        assert_eq!(saved["authOptions"]["username"], "dev");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_all_resolve() {
        let file = write_config(
            r#"{
                "siteUrl": "https://sp.contoso.local",
                "authOptions": { "username": "dev", "password": "secret", "domain": "CONTOSO" }
            }"#,
        );
        let resolver = Arc::new(FileAuthConfigResolver::new(
            file.path(),
            ResolverOptions::persistent(),
        ));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.get_context().await })
            })
            .collect();

        for handle in handles {
            let context = handle.await.unwrap().unwrap();
            assert_eq!(context.strategy, AuthStrategy::OnpremiseUserCredentials);
        }

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(saved["strategy"], "OnpremiseUserCredentials");
        assert_eq!(saved["authOptions"]["domain"], "CONTOSO");
        assert!(!resolver.staging_path().exists());
    }

    #[tokio::test]
    async fn test_detected_strategy_not_saved_without_option() {
        let json = r#"{"siteUrl": "https://sp.contoso.local", "authOptions": {"ondemand": true}}"#;
        let file = write_config(json);

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        resolver.get_context().await.unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), json);
    }

    #[tokio::test]
    async fn test_password_env_reference() {
        std::env::set_var("SP_DEV_PROXY_RESOLVER_PASSWORD", "from-env");
        let file = write_config(
            r#"{
                "siteUrl": "https://sp.contoso.local",
                "authOptions": { "username": "dev", "password": "env://SP_DEV_PROXY_RESOLVER_PASSWORD" }
            }"#,
        );

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        let context = resolver.get_context().await.unwrap();
        assert_eq!(
            context.auth_options.password.as_ref().unwrap().expose_secret(),
            "from-env"
        );

        std::env::remove_var("SP_DEV_PROXY_RESOLVER_PASSWORD");
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let file = write_config(r#"{"siteUrl": "https://sp.contoso.local", "authOptions": {}}"#);

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        let err = resolver.get_context().await.unwrap_err();
        assert!(matches!(err, SpProxyError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let file = write_config("{ not json");

        let resolver = FileAuthConfigResolver::new(file.path(), ResolverOptions::default());
        let err = resolver.get_context().await.unwrap_err();
        assert!(matches!(err, SpProxyError::Json(_)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let options: AuthOptions =
            serde_json::from_value(serde_json::json!({ "username": "dev", "password": "hunter2" }))
                .unwrap();
        assert!(!format!("{:?}", options).contains("hunter2"));
    }
}
