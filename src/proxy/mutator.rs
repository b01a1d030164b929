use crate::auth::{AuthStrategy, RequestAuth};
use crate::error::{Result, SpProxyError};
use axum::http::{header::ORIGIN, HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;

/// Header that carries the on-premises `Authorization` value upstream.
///
/// The name does not match the usual request header. Check with the auth
/// provider before changing it.
pub const ON_PREMISE_AUTH_HEADER: &str = "www-authenticate";

/// Hook applied to the outgoing request headers before forwarding
pub type OnProxyReq = fn(&mut HeaderMap, &RequestAuth, &str) -> Result<()>;

/// Copy the request's SharePoint auth onto the outgoing headers and point
/// `Origin` at the site.
pub fn apply_auth_headers(headers: &mut HeaderMap, auth: &RequestAuth, origin: &str) -> Result<()> {
    if auth.strategy == AuthStrategy::OnpremiseUserCredentials {
        let authorization = auth
            .result
            .header("Authorization")
            .ok_or(SpProxyError::MissingAuthorization)?;
        headers.insert(
            HeaderName::from_static(ON_PREMISE_AUTH_HEADER),
            header_value(authorization)?,
        );
    } else {
        for (name, value) in &auth.result.headers {
            let name = HeaderName::from_str(name)
                .map_err(|e| SpProxyError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }
    }

    headers.insert(ORIGIN, header_value(origin)?);
    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| SpProxyError::InvalidHeader(format!("invalid value: {}", e)))
}
