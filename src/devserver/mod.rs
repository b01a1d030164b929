//! Dev server assembly: the `before` hook and `proxy` map the auth
//! integration plugs into, and the axum app built from them.

use crate::auth::{mount_sp_auth, on_before_load};
use crate::config::{get_proxy_config, ProxyConfigMap, ServerConfig, API_PREFIX};
use crate::error::{Result, SpProxyError};
use crate::proxy::{proxy_handler, ProxyState};
use axum::{routing::any, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Hook that receives the app router before it is served
pub type BeforeHook = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Dev server settings
#[derive(Clone, Default)]
pub struct DevServerConfig {
    pub server: ServerConfig,
    pub before: Option<BeforeHook>,
    pub proxy: ProxyConfigMap,
}

impl std::fmt::Debug for DevServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServerConfig")
            .field("server", &self.server)
            .field("before", &self.before.is_some())
            .field("proxy", &self.proxy.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run `existing` first, if any, then `next`
pub fn chain_before(existing: Option<BeforeHook>, next: BeforeHook) -> BeforeHook {
    match existing {
        Some(existing) => Arc::new(move |app: Router| next(existing(app))),
        None => next,
    }
}

/// Wire SharePoint auth for the site described by `file_path` into the dev
/// server config.
///
/// The config file is read here, so a missing or malformed file fails
/// immediately. Proxy entries from the file replace entries with the same
/// prefix.
pub fn bootstrap<P: AsRef<Path>>(mut config: DevServerConfig, file_path: P) -> Result<DevServerConfig> {
    let file_path = file_path.as_ref().to_path_buf();
    let proxy_config = get_proxy_config(&file_path)?;

    let auth_timeout = config.server.auth_timeout();
    let mount: BeforeHook = Arc::new(move |app: Router| {
        let state = on_before_load(&file_path)
            .with_prefix(API_PREFIX)
            .with_timeout(auth_timeout);
        mount_sp_auth(app, state)
    });
    config.before = Some(chain_before(config.before.take(), mount));

    config.proxy.extend(proxy_config);
    Ok(config)
}

/// Build the app: proxy routes first, then the `before` hook so the layers
/// it adds wrap them.
pub fn build_app(config: &DevServerConfig) -> Result<Router> {
    let mut app = Router::new();

    for (prefix, route) in &config.proxy {
        let state = ProxyState::new(route.clone(), config.server.upstream_timeout())?;
        let prefix = prefix.trim_end_matches('/');
        info!(prefix = %prefix, target = %route.target(), "Registering proxy route");

        let routes = if prefix.is_empty() {
            Router::new()
                .route("/", any(proxy_handler))
                .route("/*rest", any(proxy_handler))
        } else {
            Router::new()
                .route(prefix, any(proxy_handler))
                .route(&format!("{}/", prefix), any(proxy_handler))
                .route(&format!("{}/*rest", prefix), any(proxy_handler))
        };
        app = app.merge(routes.with_state(state));
    }

    if let Some(before) = &config.before {
        app = before(app);
    }

    Ok(app.layer(TraceLayer::new_for_http()))
}

/// Serve the dev server until the listener fails
pub async fn init_dev_server(config: DevServerConfig) -> Result<()> {
    let app = build_app(&config)?;
    let addr = config.server.addr();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, routes = config.proxy.len(), "Dev proxy listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| SpProxyError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyRouteConfig;
    use axum::body::Body;
    use axum::http::StatusCode;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    fn recording_hook(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> BeforeHook {
        let log = log.clone();
        Arc::new(move |app: Router| {
            log.lock().unwrap().push(name);
            app
        })
    }

    #[test]
    fn test_chain_before_runs_existing_hook_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = chain_before(
            Some(recording_hook(&log, "existing")),
            recording_hook(&log, "sp-auth"),
        );

        let _ = hook(Router::new());
        assert_eq!(*log.lock().unwrap(), vec!["existing", "sp-auth"]);
    }

    #[test]
    fn test_chain_before_without_existing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = chain_before(None, recording_hook(&log, "sp-auth"));

        let _ = hook(Router::new());
        assert_eq!(*log.lock().unwrap(), vec!["sp-auth"]);
    }

    #[test]
    fn test_bootstrap_preserves_existing_hook() {
        let file = write_config(r#"{"siteUrl": "http://sp.contoso.local"}"#);
        let log = Arc::new(Mutex::new(Vec::new()));

        let config = DevServerConfig {
            before: Some(recording_hook(&log, "existing")),
            ..Default::default()
        };
        let config = bootstrap(config, file.path()).unwrap();

        let before = config.before.clone().unwrap();
        let _ = before(Router::new());
        assert_eq!(*log.lock().unwrap(), vec!["existing"]);
        assert!(config.proxy.contains_key(API_PREFIX));
    }

    #[tokio::test]
    async fn test_bootstrap_merges_proxy_map() {
        let legacy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/legacy/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("legacy"))
            .expect(1)
            .mount(&legacy_server)
            .await;

        let stale = write_config(r#"{"siteUrl": "http://old.contoso.local"}"#);
        let file = write_config(r#"{"siteUrl": "https://new.contoso.local"}"#);

        let mut config = DevServerConfig::default();
        config.proxy = get_proxy_config(stale.path()).unwrap();
        config.proxy.insert(
            "/legacy".to_string(),
            ProxyRouteConfig::forward_to(Url::parse(&legacy_server.uri()).unwrap()),
        );

        let config = bootstrap(config, file.path()).unwrap();

        assert_eq!(config.proxy.len(), 2);
        assert_eq!(
            config.proxy[API_PREFIX].target().as_str(),
            "https://new.contoso.local/"
        );

        let response = build_app(&config)
            .unwrap()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/legacy/x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"legacy");
    }

    #[test]
    fn test_bootstrap_fails_on_malformed_json() {
        let file = write_config("{ \"siteUrl\": ");
        let err = bootstrap(DevServerConfig::default(), file.path()).unwrap_err();
        assert!(matches!(err, SpProxyError::Config(_)));
    }

    #[test]
    fn test_build_app_with_bootstrapped_config() {
        let file = write_config(r#"{"siteUrl": "http://sp.contoso.local"}"#);
        let config = bootstrap(DevServerConfig::default(), file.path()).unwrap();
        assert!(build_app(&config).is_ok());
    }
}
