//! URL construction for the switch REST API.
//!
//! Every URL produced here uses HTTPS and the `/api/v1/` prefix. There is
//! no plain-HTTP fallback.

use std::net::Ipv6Addr;

use url::Url;

use crate::error::SwitchError;

/// Default HTTPS port of the switch API.
pub const DEFAULT_PORT: u16 = 8443;

/// Versioned API prefix, without surrounding slashes.
const API_PREFIX: [&str; 2] = ["api", "v1"];

/// Characters allowed in an endpoint argument besides ASCII alphanumerics.
const ENDPOINT_PUNCTUATION: &[char] = &['/', '.', '_', '-', '?', '=', '&', '%', '~', ',', '+'];

/// A switch address: host and HTTPS port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTarget {
    /// Hostname or IP address, without scheme.
    pub host: String,
    /// HTTPS port.
    pub port: u16,
}

impl SwitchTarget {
    /// Creates a target after validating the host.
    pub fn new(host: impl AsRef<str>, port: u16) -> Result<Self, SwitchError> {
        let host = normalize_host(host.as_ref())?;
        validate_port(port)?;
        Ok(Self { host, port })
    }

    /// Parses a base URL such as `https://192.168.99.92:8443`.
    ///
    /// A missing port means [`DEFAULT_PORT`]; a missing scheme is tolerated.
    /// Any path on the base URL is ignored.
    pub fn from_base_url(base_url: &str) -> Result<Self, SwitchError> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(SwitchError::invalid_argument("base_url is required"));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let parsed = Url::parse(&with_scheme).map_err(|e| {
            SwitchError::invalid_argument(format!("invalid base_url {:?}: {}", trimmed, e))
        })?;

        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(SwitchError::invalid_argument(format!(
                "unsupported scheme in base_url: {}",
                parsed.scheme()
            )));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(SwitchError::invalid_argument(
                "base_url must not carry user information",
            ));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| SwitchError::invalid_argument("base_url has no host"))?;

        // `Url` drops the port when it equals the scheme default, so an
        // explicit ":443" must be recovered from the authority text.
        let port = match parsed.port() {
            Some(port) => port,
            None if parsed.scheme() == "https" && has_explicit_port(trimmed, 443) => 443,
            None if parsed.scheme() == "http" && has_explicit_port(trimmed, 80) => 80,
            None => DEFAULT_PORT,
        };

        Self::new(host, port)
    }

    /// Builds the full API URL for `endpoint` on this target.
    pub fn url(&self, endpoint: &str) -> Result<String, SwitchError> {
        build_switch_url(&self.host, endpoint, self.port)
    }

    /// `https://host:port`, used in log lines.
    pub fn origin(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

fn has_explicit_port(base_url: &str, port: u16) -> bool {
    let authority = base_url
        .split_once("://")
        .map_or(base_url, |(_, rest)| rest)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    authority.ends_with(&format!(":{}", port))
}

/// Builds `https://<host>:<port>/api/v1/<endpoint>`.
///
/// The host may carry an `http://` or `https://` prefix, which is stripped.
/// Repeated slashes in the endpoint are collapsed, a leading `api/v1` is
/// removed so the prefix never appears twice, and any query string is kept
/// verbatim.
///
/// # Errors
///
/// Returns `SwitchError::InvalidArgument` for an empty or malformed host, an
/// empty endpoint, an endpoint with characters outside the allowed set
/// (control characters, `<`, `:` and so on), or port 0.
///
/// # Example
///
/// ```
/// use m4300::switch_url::build_switch_url;
///
/// let url = build_switch_url("192.168.1.1", "/device_info", 8443).unwrap();
/// assert_eq!(url, "https://192.168.1.1:8443/api/v1/device_info");
/// ```
pub fn build_switch_url(host: &str, endpoint: &str, port: u16) -> Result<String, SwitchError> {
    let host = normalize_host(host)?;
    let path = normalize_endpoint(endpoint)?;
    validate_port(port)?;

    let url = format!("https://{}:{}/{}/{}", host, port, API_PREFIX.join("/"), path);

    // Final sanity check with a real URL parser.
    Url::parse(&url).map_err(|e| {
        SwitchError::invalid_argument(format!("could not build a valid URL: {}", e))
    })?;

    Ok(url)
}

fn normalize_host(host: &str) -> Result<String, SwitchError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(SwitchError::invalid_argument("hostname cannot be empty"));
    }

    let host = strip_scheme(host).trim_end_matches('/');
    if host.is_empty() {
        return Err(SwitchError::invalid_argument("hostname cannot be empty"));
    }

    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner
            .parse::<Ipv6Addr>()
            .map(|_| host.to_string())
            .map_err(|_| SwitchError::invalid_argument(format!("invalid hostname format: {:?}", host)));
    }

    let well_formed = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && !host.starts_with(['.', '-'])
        && !host.ends_with('-');
    if !well_formed {
        return Err(SwitchError::invalid_argument(format!(
            "invalid hostname format: {:?}",
            host.chars().take(64).collect::<String>()
        )));
    }

    Ok(host.to_string())
}

fn strip_scheme(host: &str) -> &str {
    for scheme in ["https://", "http://"] {
        if host.len() >= scheme.len() && host[..scheme.len()].eq_ignore_ascii_case(scheme) {
            return &host[scheme.len()..];
        }
    }
    host
}

fn normalize_endpoint(endpoint: &str) -> Result<String, SwitchError> {
    if endpoint.trim().is_empty() {
        return Err(SwitchError::invalid_argument("endpoint cannot be empty"));
    }

    if !endpoint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ENDPOINT_PUNCTUATION.contains(&c))
    {
        return Err(SwitchError::invalid_argument(format!(
            "invalid endpoint format: {:?}",
            endpoint.chars().take(64).collect::<String>()
        )));
    }

    let (path, query) = match endpoint.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (endpoint, None),
    };

    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    while segments.len() >= API_PREFIX.len() && segments[..API_PREFIX.len()] == API_PREFIX {
        segments.drain(..API_PREFIX.len());
    }

    if segments.is_empty() {
        return Err(SwitchError::invalid_argument(format!(
            "endpoint {:?} names no resource",
            endpoint
        )));
    }

    let mut normalized = segments.join("/");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }
    Ok(normalized)
}

fn validate_port(port: u16) -> Result<(), SwitchError> {
    if port == 0 {
        return Err(SwitchError::invalid_argument(
            "port must be between 1 and 65535",
        ));
    }
    Ok(())
}
