use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::resolver::AuthOptions;

const ONLINE_HOST_SUFFIXES: &[&str] = &[
    ".sharepoint.com",
    ".sharepoint.cn",
    ".sharepoint.de",
    ".sharepoint-mil.us",
    ".sharepoint.us",
];

/// SharePoint authentication mechanism in use for a site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthStrategy {
    OnpremiseUserCredentials,
    OnpremiseFbaCredentials,
    OnpremiseTmgCredentials,
    OnpremiseAddinOnly,
    OnlineUserCredentials,
    OnlineAddinOnly,
    AdfsUserCredentials,
    OnDemand,
    /// Tag set explicitly in the config that this crate does not know about
    Other(String),
}

impl AuthStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            AuthStrategy::OnpremiseUserCredentials => "OnpremiseUserCredentials",
            AuthStrategy::OnpremiseFbaCredentials => "OnpremiseFbaCredentials",
            AuthStrategy::OnpremiseTmgCredentials => "OnpremiseTmgCredentials",
            AuthStrategy::OnpremiseAddinOnly => "OnpremiseAddinOnly",
            AuthStrategy::OnlineUserCredentials => "OnlineUserCredentials",
            AuthStrategy::OnlineAddinOnly => "OnlineAddinOnly",
            AuthStrategy::AdfsUserCredentials => "AdfsUserCredentials",
            AuthStrategy::OnDemand => "OnDemand",
            AuthStrategy::Other(tag) => tag,
        }
    }

    /// Pick a strategy from the credential fields present in the options.
    ///
    /// More specific credential shapes are checked first. Returns `None` when
    /// the options carry nothing usable.
    pub fn detect(site_url: &Url, options: &AuthOptions) -> Option<Self> {
        let has_user = options.username.is_some() && options.password.is_some();

        if options.ondemand == Some(true) {
            return Some(AuthStrategy::OnDemand);
        }
        if options.client_id.is_some()
            && options.issuer_id.is_some()
            && options.realm.is_some()
            && options.rsa_private_key_path.is_some()
            && options.sha_thumbprint.is_some()
        {
            return Some(AuthStrategy::OnpremiseAddinOnly);
        }
        if options.client_id.is_some() && options.client_secret.is_some() {
            return Some(AuthStrategy::OnlineAddinOnly);
        }
        if has_user && options.relying_party.is_some() && options.adfs_url.is_some() {
            return Some(AuthStrategy::AdfsUserCredentials);
        }
        if has_user && options.fba == Some(true) {
            return Some(AuthStrategy::OnpremiseFbaCredentials);
        }
        if has_user && options.tmg == Some(true) {
            return Some(AuthStrategy::OnpremiseTmgCredentials);
        }
        if has_user {
            if is_online_host(site_url) && options.domain.is_none() {
                return Some(AuthStrategy::OnlineUserCredentials);
            }
            return Some(AuthStrategy::OnpremiseUserCredentials);
        }
        if !options.headers.is_empty() {
            return Some(AuthStrategy::OnDemand);
        }

        None
    }
}

fn is_online_host(site_url: &Url) -> bool {
    site_url
        .host_str()
        .map(|host| {
            let host = host.to_ascii_lowercase();
            ONLINE_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        })
        .unwrap_or(false)
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AuthStrategy {
    fn from(s: &str) -> Self {
        match s {
            "OnpremiseUserCredentials" => AuthStrategy::OnpremiseUserCredentials,
            "OnpremiseFbaCredentials" => AuthStrategy::OnpremiseFbaCredentials,
            "OnpremiseTmgCredentials" => AuthStrategy::OnpremiseTmgCredentials,
            "OnpremiseAddinOnly" => AuthStrategy::OnpremiseAddinOnly,
            "OnlineUserCredentials" => AuthStrategy::OnlineUserCredentials,
            "OnlineAddinOnly" => AuthStrategy::OnlineAddinOnly,
            "AdfsUserCredentials" => AuthStrategy::AdfsUserCredentials,
            "OnDemand" => AuthStrategy::OnDemand,
            other => AuthStrategy::Other(other.to_string()),
        }
    }
}

impl FromStr for AuthStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AuthStrategy::from(s))
    }
}

impl Serialize for AuthStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuthStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(AuthStrategy::from(tag.as_str()))
    }
}
