//! Request and response payloads of the provider's REST API.
//!
//! Only the fields Signflow reads or writes are modelled; everything else in
//! the provider's schema is ignored on decode.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "access_token")]
    pub token: String,
    #[serde(rename = "token_type", default)]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(rename = "expires_in")]
    pub expires_in: u64,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// `/oauth/userinfo` response.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub accounts: Vec<AccountInfo>,
}

impl UserInfo {
    /// The account flagged as default, else the first listed.
    pub fn default_account(&self) -> Option<&AccountInfo> {
        self.accounts
            .iter()
            .find(|account| account.is_default)
            .or_else(|| self.accounts.first())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub account_name: String,
    pub base_uri: String,
}

/// Bearer token plus the account it is scoped to.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountSession {
    pub access_token: String,
    pub account_id: String,
    pub base_uri: String,
}

impl fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSession")
            .field("access_token", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("base_uri", &self.base_uri)
            .finish()
    }
}

/// Body of the create-envelope-from-template request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeTemplateDefinition {
    pub template_id: String,
    pub status: String,
    pub template_roles: Vec<TemplateRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRole {
    pub email: String,
    pub name: String,
    pub role_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFields {
    #[serde(default)]
    pub text_custom_fields: Vec<TextCustomField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextCustomField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub show: String,
    #[serde(default)]
    pub required: String,
}

impl CustomFields {
    /// A single hidden, optional text field.
    pub fn hidden_text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text_custom_fields: vec![TextCustomField {
                name: name.into(),
                value: value.into(),
                show: "false".into(),
                required: "false".into(),
            }],
        }
    }
}

/// Response of the envelope listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeList {
    #[serde(default)]
    pub envelopes: Vec<signflow_types::EnvelopeSummary>,
    #[serde(default, deserialize_with = "count_from_string")]
    pub result_set_size: u32,
}

/// The provider serializes counts as strings.
fn count_from_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Text(String),
        Number(u32),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(value) => Ok(value),
        Count::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
