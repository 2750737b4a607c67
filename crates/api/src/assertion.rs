//! JWT bearer assertions for the provider's impersonation grant.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;

use crate::config::{ConfigError, ProviderConfig};

/// Lifetime requested for each assertion.
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;
const IMPERSONATION_SCOPE: &str = "signature impersonation";

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    scope: &'static str,
}

/// Signs RS256 assertions with the integration's private key.
pub struct JwtAssertionSigner {
    client_id: String,
    audience: String,
    key: EncodingKey,
}

impl fmt::Debug for JwtAssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtAssertionSigner")
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl JwtAssertionSigner {
    /// Parse the configured PEM key; an unusable key is a configuration error.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let key = EncodingKey::from_rsa_pem(&config.private_key).map_err(|error| ConfigError::KeyInvalid(error.to_string()))?;
        Ok(Self {
            client_id: config.client_id.clone(),
            audience: config.audience().to_string(),
            key,
        })
    }

    /// Sign an assertion impersonating `subject`, issued at `now`.
    pub fn sign(&self, subject: &str, now: DateTime<Utc>) -> Result<String, ConfigError> {
        let issued_at = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.client_id,
            sub: subject,
            aud: &self.audience,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
            scope: IMPERSONATION_SCOPE,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|error| ConfigError::KeyInvalid(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use serde_json::Value;

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test_signing_key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../tests/fixtures/test_signing_key.pub.pem");

    fn config(private_key: &[u8]) -> ProviderConfig {
        ProviderConfig {
            client_id: "integration-key".into(),
            auth_base_url: "https://account-d.docusign.com".into(),
            private_key: private_key.to_vec(),
        }
    }

    #[test]
    fn signed_assertion_carries_impersonation_claims() {
        let signer = JwtAssertionSigner::from_config(&config(PRIVATE_KEY)).unwrap();
        let now = Utc::now();
        let token = signer.sign("U1", now).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["account-d.docusign.com"]);
        let decoded = decode::<Value>(&token, &DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap(), &validation).unwrap();

        assert_eq!(decoded.claims["iss"], "integration-key");
        assert_eq!(decoded.claims["sub"], "U1");
        assert_eq!(decoded.claims["scope"], "signature impersonation");
        assert_eq!(
            decoded.claims["exp"].as_i64().unwrap() - decoded.claims["iat"].as_i64().unwrap(),
            ASSERTION_LIFETIME_SECS
        );
    }

    #[test]
    fn malformed_key_is_a_config_error() {
        let error = JwtAssertionSigner::from_config(&config(b"not a key")).unwrap_err();
        assert!(matches!(error, ConfigError::KeyInvalid(_)));
    }
}
