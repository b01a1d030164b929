//! SharePoint authentication: config resolution, auth providers and the
//! middleware that attaches auth headers to each `/_api` request.

pub mod middleware;
pub mod provider;
pub mod resolver;
pub mod strategy;

pub use middleware::{mount_sp_auth, on_before_load, sp_auth_middleware, RequestAuth, SpAuthState};
pub use provider::{AuthResult, CachedAuth, CredentialsAuth, SharePointAuth};
pub use resolver::{
    AuthConfigResolver, AuthContext, AuthOptions, FileAuthConfigResolver, ResolverOptions,
};
pub use strategy::AuthStrategy;
