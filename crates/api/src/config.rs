//! Startup configuration for the provider integration.
//!
//! Values come from the environment:
//!
//! - `SIGNFLOW_CLIENT_ID`: integration key used as the assertion issuer
//! - `SIGNFLOW_PRIVATE_KEY_PATH`: RSA signing key (defaults to `./private.pem`)
//! - `SIGNFLOW_ENV`: `dev` selects the sandbox auth host
//! - `SIGNFLOW_AUTH_BASE`: explicit auth host override

use std::{env, fmt, fs, path::PathBuf};

use thiserror::Error;
use url::Url;

pub const CLIENT_ID_ENV: &str = "SIGNFLOW_CLIENT_ID";
pub const PRIVATE_KEY_PATH_ENV: &str = "SIGNFLOW_PRIVATE_KEY_PATH";
pub const ENVIRONMENT_ENV: &str = "SIGNFLOW_ENV";
pub const AUTH_BASE_ENV: &str = "SIGNFLOW_AUTH_BASE";

pub const PRODUCTION_AUTH_BASE: &str = "https://account.docusign.com";
pub const SANDBOX_AUTH_BASE: &str = "https://account-d.docusign.com";
const DEFAULT_PRIVATE_KEY_PATH: &str = "./private.pem";

/// Allowed base domains for the auth host and account base URIs.
/// Subdomains of these domains are also allowed.
const ALLOWED_PROVIDER_DOMAINS: &[&str] = &["docusign.com", "docusign.net"];
/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("failed to read signing key at {path}: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("signing key is not a valid RSA private key: {0}")]
    KeyInvalid(String),

    #[error("invalid provider URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Configuration consumed by the authentication resolver and provider client.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Integration key registered with the provider.
    pub client_id: String,
    /// OAuth host, e.g. `https://account-d.docusign.com`.
    pub auth_base_url: String,
    /// PEM-encoded RSA private key used to sign assertions.
    pub private_key: Vec<u8>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("auth_base_url", &self.auth_base_url)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl ProviderConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = env::var(CLIENT_ID_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar(CLIENT_ID_ENV))?;

        let key_path = env::var(PRIVATE_KEY_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| signflow_util::expand_tilde_path(PathBuf::from(value)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIVATE_KEY_PATH));
        let private_key = fs::read(&key_path).map_err(|source| ConfigError::KeyUnreadable { path: key_path, source })?;

        let auth_base_url = match env::var(AUTH_BASE_ENV) {
            Ok(value) if !value.trim().is_empty() => value.trim().trim_end_matches('/').to_string(),
            _ if is_sandbox() => SANDBOX_AUTH_BASE.to_string(),
            _ => PRODUCTION_AUTH_BASE.to_string(),
        };
        validate_base_url(&auth_base_url)?;

        Ok(Self {
            client_id,
            auth_base_url,
            private_key,
        })
    }

    /// Audience claim for assertions: the auth host without its scheme.
    pub fn audience(&self) -> &str {
        self.auth_base_url
            .strip_prefix("https://")
            .or_else(|| self.auth_base_url.strip_prefix("http://"))
            .unwrap_or(&self.auth_base_url)
    }
}

fn is_sandbox() -> bool {
    env::var(ENVIRONMENT_ENV)
        .map(|value| value.eq_ignore_ascii_case("dev") || value.eq_ignore_ascii_case("sandbox"))
        .unwrap_or(false)
}

/// Validate that a base URL is acceptable for provider calls.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS, and host must be one of the allowed
///   provider domains or a subdomain thereof
pub fn validate_base_url(base: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: base.to_string(),
        reason,
    };
    let parsed_base_url = Url::parse(base).map_err(|error| invalid(error.to_string()))?;

    let host_name = parsed_base_url.host_str().ok_or_else(|| invalid("URL must include a host".into()))?;

    if LOCALHOST_DOMAINS
        .iter()
        .any(|&allowed| host_name.eq_ignore_ascii_case(allowed))
    {
        return Ok(());
    }

    if parsed_base_url.scheme() != "https" {
        return Err(invalid(format!(
            "must use https for non-localhost hosts; got '{}://'",
            parsed_base_url.scheme()
        )));
    }

    let is_allowed_domain = ALLOWED_PROVIDER_DOMAINS.iter().any(|&allowed_domain| {
        host_name.eq_ignore_ascii_case(allowed_domain) || host_name.ends_with(&format!(".{}", allowed_domain))
    });
    if !is_allowed_domain {
        return Err(invalid(format!(
            "host '{}' is not allowed; must be one of {:?} or a subdomain, or localhost",
            host_name, ALLOWED_PROVIDER_DOMAINS
        )));
    }

    Ok(())
}
