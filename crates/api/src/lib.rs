//! Signing-provider API client.
//!
//! This crate provides a lightweight client for the provider's eSignature REST
//! API. It focuses on:
//!
//! - Loading integration settings from the environment ([`ProviderConfig`])
//! - Signing impersonation assertions ([`JwtAssertionSigner`])
//! - Exchanging assertions for tokens and resolving the user's account
//! - Envelope and document-generation field operations scoped to an account
//!
//! Every non-success response becomes [`ProviderError::Http`] with the status
//! and a redacted body; retry decisions belong to the caller.
//!
//! # Example
//!
//! ```ignore
//! use signflow_api::{JwtAssertionSigner, ProviderClient, ProviderConfig};
//!
//! async fn token() -> anyhow::Result<()> {
//!     let config = ProviderConfig::from_env()?;
//!     let signer = JwtAssertionSigner::from_config(&config)?;
//!     let client = ProviderClient::new(&config)?;
//!     let assertion = signer.sign("4e3a9121-335b-48dc-a20e-a0f46f4a277c", chrono::Utc::now())?;
//!     let token = client.exchange_assertion(&assertion).await?;
//!     println!("expires in {}s", token.expires_in);
//!     Ok(())
//! }
//! ```

pub mod assertion;
pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use assertion::JwtAssertionSigner;
pub use client::{ProviderClient, account_url};
pub use config::{ConfigError, ProviderConfig};
pub use error::ProviderError;
pub use models::{
    AccessToken, AccountInfo, AccountSession, CustomFields, EnvelopeList, EnvelopeTemplateDefinition, TemplateRole, TextCustomField,
    UserInfo,
};
