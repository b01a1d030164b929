use crate::config::API_PREFIX;
use crate::error::{Result, SpProxyError};
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{AuthResult, CachedAuth, CredentialsAuth, SharePointAuth};
use super::resolver::{AuthConfigResolver, FileAuthConfigResolver, ResolverOptions};
use super::strategy::AuthStrategy;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Auth context for one request, attached by [`sp_auth_middleware`]
#[derive(Debug, Clone)]
pub struct RequestAuth {
    pub result: AuthResult,
    pub strategy: AuthStrategy,
    pub request_id: String,
}

/// State shared by the auth middleware across requests
#[derive(Clone)]
pub struct SpAuthState {
    prefix: String,
    resolver: Arc<dyn AuthConfigResolver>,
    provider: Arc<dyn SharePointAuth>,
    timeout: Option<Duration>,
}

impl SpAuthState {
    pub fn new(resolver: Arc<dyn AuthConfigResolver>, provider: Arc<dyn SharePointAuth>) -> Self {
        Self {
            prefix: API_PREFIX.to_string(),
            resolver,
            provider,
            timeout: None,
        }
    }

    /// Mount under a different path prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Limit how long context resolution plus auth fetch may take
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the site context, then fetch auth headers for it
    pub async fn authenticate(&self) -> Result<(AuthResult, AuthStrategy)> {
        let fetch = async {
            let context = self.resolver.get_context().await?;
            debug!(
                site = %context.site_url,
                strategy = %context.strategy,
                "Resolved auth context"
            );

            let result = self
                .provider
                .get_auth(&context.site_url, &context.auth_options)
                .await?;
            Ok::<_, SpProxyError>((result, context.strategy))
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                SpProxyError::Timeout(format!("Auth did not complete within {:?}", limit))
            })?,
            None => fetch.await,
        }
    }
}

/// Auth middleware bound to a site config file.
///
/// Resolves with encrypted-password and save-to-disk options enabled and
/// caches fetched headers per site and principal.
pub fn on_before_load<P: AsRef<Path>>(file_path: P) -> SpAuthState {
    let resolver = FileAuthConfigResolver::new(file_path, ResolverOptions::persistent());
    let provider = CachedAuth::new(CredentialsAuth::new());
    SpAuthState::new(Arc::new(resolver), Arc::new(provider))
}

/// Wrap every route registered on `app` so far with the auth middleware
pub fn mount_sp_auth<S>(app: Router<S>, state: SpAuthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    info!(prefix = %state.prefix, "Mounting SharePoint auth middleware");
    app.layer(middleware::from_fn_with_state(state, sp_auth_middleware))
}

/// Fetch SharePoint auth for requests under the prefix and attach it as a
/// [`RequestAuth`] extension. Failures end the request with an error response.
pub async fn sp_auth_middleware(
    State(state): State<SpAuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    if !matches_prefix(req.uri().path(), &state.prefix) {
        return next.run(req).await;
    }

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.authenticate().await {
        Ok((result, strategy)) => {
            debug!(
                request_id = %request_id,
                path = %req.uri().path(),
                strategy = %strategy,
                "Attached SharePoint auth"
            );
            req.extensions_mut().insert(RequestAuth {
                result,
                strategy,
                request_id,
            });
            next.run(req).await
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                path = %req.uri().path(),
                error = %e,
                "SharePoint authentication failed"
            );
            e.into_response()
        }
    }
}

/// Express-style mount matching: the prefix itself or anything below it
fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }

    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
