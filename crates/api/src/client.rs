//! HTTP client for the signing provider.

use std::{env, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, header};
use serde::{Serialize, de::DeserializeOwned};
use signflow_types::{EnvelopeState, EnvelopeStatus, EnvelopeSummary, FormFieldsRequest};
use signflow_util::{parse_response_json_strict, redact_sensitive};
use tracing::{debug, warn};

use crate::{
    AccessToken, AccountSession, EnvelopeList, EnvelopeTemplateDefinition, ProviderConfig, ProviderError, UserInfo,
    config::validate_base_url,
};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const API_PREFIX: &str = "/restapi/v2.1";

#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
}

/// Thin wrapper around a configured `reqwest::Client` for provider access.
///
/// Auth endpoints are resolved against the configured auth host; envelope
/// endpoints against the account-scoped base URI carried by each
/// [`AccountSession`].
#[derive(Debug, Clone)]
pub struct ProviderClient {
    pub auth_base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ProviderError::Transport {
                operation: "build http client",
                source,
            })?;

        Ok(Self {
            auth_base_url: config.auth_base_url.clone(),
            http,
            user_agent: format!("signflow/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Exchange a signed assertion for an access token.
    pub async fn exchange_assertion(&self, assertion: &str) -> Result<AccessToken, ProviderError> {
        let url = format!("{}/oauth/token", self.auth_base_url);
        let builder = self
            .http
            .post(url)
            .header(header::USER_AGENT, &self.user_agent)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)]);
        send_json("token exchange", builder).await
    }

    /// Fetch the accounts the token's user belongs to.
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        let url = format!("{}/oauth/userinfo", self.auth_base_url);
        let builder = self
            .http
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .bearer_auth(access_token);
        send_json("user info", builder).await
    }

    pub async fn create_envelope(
        &self,
        session: &AccountSession,
        definition: &EnvelopeTemplateDefinition,
    ) -> Result<EnvelopeSummary, ProviderError> {
        let builder = self.account_request(session, Method::POST, "/envelopes")?.json(definition);
        send_json("create envelope", builder).await
    }

    /// List envelopes changed since `from_date` whose text custom field
    /// `name` equals `value`.
    pub async fn find_envelopes_by_custom_field(
        &self,
        session: &AccountSession,
        name: &str,
        value: &str,
        from_date: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeSummary>, ProviderError> {
        let from_date = from_date.to_rfc3339_opts(SecondsFormat::Secs, true);
        let custom_field = format!("{name}={value}");
        let builder = self
            .account_request(session, Method::GET, "/envelopes")?
            .query(&[("from_date", from_date.as_str()), ("custom_field", custom_field.as_str())]);
        let list: EnvelopeList = send_json("list envelopes", builder).await?;
        Ok(list.envelopes)
    }

    pub async fn update_envelope_status(
        &self,
        session: &AccountSession,
        envelope_id: &str,
        status: &EnvelopeState,
    ) -> Result<(), ProviderError> {
        let path = format!("/envelopes/{envelope_id}");
        let builder = self
            .account_request(session, Method::PUT, &path)?
            .json(&StatusUpdate { status: status.as_str() });
        send_empty("update envelope status", builder).await
    }

    pub async fn get_envelope_status(&self, session: &AccountSession, envelope_id: &str) -> Result<EnvelopeStatus, ProviderError> {
        let path = format!("/envelopes/{envelope_id}");
        let builder = self.account_request(session, Method::GET, &path)?;
        send_json("get envelope status", builder).await
    }

    pub async fn get_form_fields(&self, session: &AccountSession, envelope_id: &str) -> Result<FormFieldsRequest, ProviderError> {
        let path = format!("/envelopes/{envelope_id}/docGenFormFields");
        let builder = self.account_request(session, Method::GET, &path)?;
        send_json("get form fields", builder).await
    }

    pub async fn put_form_fields(
        &self,
        session: &AccountSession,
        envelope_id: &str,
        fields: &FormFieldsRequest,
    ) -> Result<(), ProviderError> {
        let path = format!("/envelopes/{envelope_id}/docGenFormFields");
        let builder = self.account_request(session, Method::PUT, &path)?.json(fields);
        send_empty("put form fields", builder).await
    }

    /// Build a request against the session's account-scoped base URI.
    fn account_request(&self, session: &AccountSession, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        validate_base_url(&session.base_uri)?;
        let url = account_url(&session.base_uri, &session.account_id, path);
        debug!(%url, %method, "building provider request");

        Ok(self
            .http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
            .bearer_auth(&session.access_token))
    }
}

/// `{base}/restapi/v2.1/accounts/{account}{path}`
pub fn account_url(base_uri: &str, account_id: &str, path: &str) -> String {
    format!("{}{API_PREFIX}/accounts/{account_id}{path}", base_uri.trim_end_matches('/'))
}

async fn send_raw(operation: &'static str, builder: RequestBuilder) -> Result<(reqwest::StatusCode, String), ProviderError> {
    let response = builder
        .send()
        .await
        .map_err(|source| ProviderError::Transport { operation, source })?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        let body = redact_sensitive(&text);
        warn!(operation, status = status.as_u16(), %body, "provider call failed");
        return Err(ProviderError::Http {
            operation,
            status: status.as_u16(),
            body,
        });
    }

    Ok((status, text))
}

async fn send_json<T: DeserializeOwned>(operation: &'static str, builder: RequestBuilder) -> Result<T, ProviderError> {
    let (status, text) = send_raw(operation, builder).await?;
    let value = parse_response_json_strict(&text, Some(status)).map_err(|source| ProviderError::Decode { operation, source })?;
    serde_json::from_value(value).map_err(|source| ProviderError::Schema { operation, source })
}

async fn send_empty(operation: &'static str, builder: RequestBuilder) -> Result<(), ProviderError> {
    send_raw(operation, builder).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(base_uri: &str) -> AccountSession {
        AccountSession {
            access_token: "token".into(),
            account_id: "A1".into(),
            base_uri: base_uri.into(),
        }
    }

    fn client() -> ProviderClient {
        ProviderClient::new(&ProviderConfig {
            client_id: "integration-key".into(),
            auth_base_url: "https://account-d.docusign.com".into(),
            private_key: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn account_url_joins_base_and_path() {
        assert_eq!(
            account_url("https://demo.docusign.net/", "A1", "/envelopes/E1/docGenFormFields"),
            "https://demo.docusign.net/restapi/v2.1/accounts/A1/envelopes/E1/docGenFormFields"
        );
    }

    #[test]
    fn account_requests_carry_bearer_token() {
        let request = client()
            .account_request(&session("https://demo.docusign.net"), Method::GET, "/envelopes/E1")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "https://demo.docusign.net/restapi/v2.1/accounts/A1/envelopes/E1");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer token");
    }

    #[test]
    fn untrusted_base_uri_is_refused() {
        let error = client()
            .account_request(&session("https://attacker.example"), Method::GET, "/envelopes")
            .unwrap_err();
        assert!(matches!(error, ProviderError::UntrustedBaseUri(_)));
    }
}
