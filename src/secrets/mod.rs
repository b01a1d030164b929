use crate::error::{Result, SpProxyError};
use secrecy::Secret;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use tracing::debug;

/// Secret string wrapper that prevents accidental exposure
pub type SecretString = Secret<String>;

/// Whether a config value points somewhere else instead of holding the secret
pub fn is_secret_ref(value: &str) -> bool {
    value.starts_with("env://") || value.starts_with("file://")
}

/// Helper function to resolve a secret reference
/// Supports formats:
/// - "env://VAR" - Load from environment variable
/// - "file:///path/to/file" - Load from file, surrounding whitespace trimmed
/// - Any other value is returned as-is
pub fn resolve_secret_ref(value: &str) -> Result<SecretString> {
    if let Some(env_var) = value.strip_prefix("env://") {
        debug!("Resolving environment variable: {}", env_var);
        env::var(env_var).map(Secret::new).map_err(|_| {
            SpProxyError::Config(format!("Environment variable '{}' not found", env_var))
        })
    } else if let Some(path) = value.strip_prefix("file://") {
        debug!("Resolving file reference: {}", path);
        fs::read_to_string(path)
            .map(|s| Secret::new(s.trim().to_string()))
            .map_err(|e| SpProxyError::Config(format!("Failed to read file {}: {}", path, e)))
    } else {
        Ok(Secret::new(value.to_string()))
    }
}

/// Custom deserializer for optional secret strings
pub fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(Secret::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_resolve_env_ref() {
        std::env::set_var("SP_DEV_PROXY_TEST_PASSWORD", "env_value");

        let secret = resolve_secret_ref("env://SP_DEV_PROXY_TEST_PASSWORD").unwrap();
        assert_eq!(secret.expose_secret(), "env_value");

        std::env::remove_var("SP_DEV_PROXY_TEST_PASSWORD");
        assert!(resolve_secret_ref("env://SP_DEV_PROXY_TEST_PASSWORD").is_err());
    }

    #[test]
    fn test_resolve_file_ref() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file_secret_value").unwrap();

        let reference = format!("file://{}", file.path().display());
        let secret = resolve_secret_ref(&reference).unwrap();
        assert_eq!(secret.expose_secret(), "file_secret_value");
    }

    #[test]
    fn test_plain_value_passthrough() {
        let secret = resolve_secret_ref("p@ssw0rd").unwrap();
        assert_eq!(secret.expose_secret(), "p@ssw0rd");
        assert!(!is_secret_ref("p@ssw0rd"));
        assert!(is_secret_ref("env://SP_PASSWORD"));
        assert!(is_secret_ref("file:///run/secrets/sp"));
    }
}
