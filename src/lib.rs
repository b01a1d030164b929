pub mod auth;
pub mod config;
pub mod devserver;
pub mod error;
pub mod proxy;
pub mod secrets;

pub use crate::devserver::{bootstrap, build_app, init_dev_server, BeforeHook, DevServerConfig};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sp_dev_proxy=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
