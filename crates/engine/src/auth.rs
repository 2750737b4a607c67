//! Resolution of a principal to a usable account session.
//!
//! [`CachedAuthResolver`] answers from the [`CredentialCache`] when it can and
//! otherwise runs the impersonation grant: sign an assertion, exchange it for a
//! token, look up the user's default account. Concurrent misses for the same
//! principal are collapsed into one exchange.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use signflow_api::{
    AccessToken, AccountSession, JwtAssertionSigner, ProviderClient, ProviderError, UserInfo, config::validate_base_url,
};
use signflow_types::Principal;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{AuthContext, CredentialCache};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The signing key or integration settings are unusable.
    #[error("authentication is misconfigured: {0}")]
    ConfigInvalid(String),

    #[error("token exchange failed: HTTP {status}: {body}")]
    ExchangeFailed { status: u16, body: String },

    #[error("no provider account is bound to principal {principal}")]
    NoAccountBound { principal: Principal },

    #[error("could not reach the authentication service: {0}")]
    Transport(String),

    #[error("authentication service returned an unexpected body: {0}")]
    MalformedResponse(String),

    #[error("account base URI is not trusted: {0}")]
    UntrustedBaseUri(String),
}

impl AuthError {
    /// Whether a later attempt could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExchangeFailed { .. } | Self::Transport(_) | Self::MalformedResponse(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "ConfigInvalid",
            Self::ExchangeFailed { .. } => "ExchangeFailed",
            Self::NoAccountBound { .. } => "NoAccountBound",
            Self::Transport(_) => "Transport",
            Self::MalformedResponse(_) => "MalformedResponse",
            Self::UntrustedBaseUri(_) => "UntrustedBaseUri",
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Http { status, body, .. } => Self::ExchangeFailed { status, body },
            ProviderError::Transport { .. } => Self::Transport(error.to_string()),
            ProviderError::Decode { .. } | ProviderError::Schema { .. } => Self::MalformedResponse(error.to_string()),
            ProviderError::UntrustedBaseUri(_) => Self::UntrustedBaseUri(error.to_string()),
        }
    }
}

/// Produces the signed assertion presented to the token endpoint.
pub trait AssertionSigner: Send + Sync {
    fn sign_assertion(&self, principal: &Principal) -> Result<String, AuthError>;
}

impl AssertionSigner for JwtAssertionSigner {
    fn sign_assertion(&self, principal: &Principal) -> Result<String, AuthError> {
        self.sign(principal.as_str(), Utc::now())
            .map_err(|error| AuthError::ConfigInvalid(error.to_string()))
    }
}

/// The provider's OAuth endpoints.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange_assertion(&self, assertion: &str) -> Result<AccessToken, ProviderError>;
    async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError>;
}

#[async_trait]
impl TokenExchange for ProviderClient {
    async fn exchange_assertion(&self, assertion: &str) -> Result<AccessToken, ProviderError> {
        ProviderClient::exchange_assertion(self, assertion).await
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        ProviderClient::user_info(self, access_token).await
    }
}

#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, principal: &Principal) -> Result<AuthContext, AuthError>;
}

/// Cache-first resolver with per-principal single-flight.
pub struct CachedAuthResolver {
    cache: Arc<CredentialCache>,
    signer: Arc<dyn AssertionSigner>,
    exchange: Arc<dyn TokenExchange>,
    in_flight: Mutex<HashMap<Principal, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachedAuthResolver {
    pub fn new(cache: Arc<CredentialCache>, signer: Arc<dyn AssertionSigner>, exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            cache,
            signer,
            exchange,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    fn principal_lock(&self, principal: &Principal) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(in_flight.entry(principal.clone()).or_default())
    }

    fn release_principal_lock(&self, principal: &Principal, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller hold it: nobody is queued behind us.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(principal);
        }
    }

    async fn exchange(&self, principal: &Principal) -> Result<AuthContext, AuthError> {
        let assertion = self.signer.sign_assertion(principal)?;
        let token = self.exchange.exchange_assertion(&assertion).await?;
        let user = self.exchange.user_info(&token.token).await?;

        let account = user.default_account().ok_or_else(|| AuthError::NoAccountBound {
            principal: principal.clone(),
        })?;
        validate_base_url(&account.base_uri).map_err(|error| AuthError::UntrustedBaseUri(error.to_string()))?;

        let session = AccountSession {
            access_token: token.token.clone(),
            account_id: account.account_id.clone(),
            base_uri: account.base_uri.clone(),
        };
        let context = AuthContext::from_token_lifetime(session, Duration::from_secs(token.expires_in));
        info!(
            %principal,
            account_id = %context.account_id(),
            ttl_secs = context.ttl.as_secs(),
            "resolved provider credentials"
        );
        Ok(context)
    }
}

#[async_trait]
impl AuthResolver for CachedAuthResolver {
    async fn resolve(&self, principal: &Principal) -> Result<AuthContext, AuthError> {
        if let Some(context) = self.cache.get(principal).await {
            return Ok(context);
        }

        let lock = self.principal_lock(principal);
        let result = {
            let _guard = lock.lock().await;
            match self.cache.get(principal).await {
                Some(context) => {
                    debug!(%principal, "credentials resolved by a concurrent caller");
                    Ok(context)
                }
                None => match self.exchange(principal).await {
                    Ok(context) => {
                        self.cache.set(principal.clone(), context.clone()).await;
                        Ok(context)
                    }
                    Err(error) => Err(error),
                },
            }
        };
        self.release_principal_lock(principal, lock);
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use signflow_api::AccountInfo;

    use super::*;

    pub(crate) struct StaticSigner;

    impl AssertionSigner for StaticSigner {
        fn sign_assertion(&self, principal: &Principal) -> Result<String, AuthError> {
            Ok(format!("assertion-for-{principal}"))
        }
    }

    struct BrokenSigner;

    impl AssertionSigner for BrokenSigner {
        fn sign_assertion(&self, _principal: &Principal) -> Result<String, AuthError> {
            Err(AuthError::ConfigInvalid("private key is not valid PEM".into()))
        }
    }

    /// Token endpoint fake that counts exchanges and can be scripted to fail.
    pub(crate) struct FakeExchange {
        pub exchanges: AtomicUsize,
        pub token_status: Option<u16>,
        pub accounts: Vec<AccountInfo>,
        pub latency: Duration,
    }

    impl Default for FakeExchange {
        fn default() -> Self {
            Self {
                exchanges: AtomicUsize::new(0),
                token_status: None,
                accounts: vec![AccountInfo {
                    account_id: "A1".into(),
                    is_default: true,
                    account_name: "Acme".into(),
                    base_uri: "https://demo.docusign.net".into(),
                }],
                latency: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TokenExchange for FakeExchange {
        async fn exchange_assertion(&self, assertion: &str) -> Result<AccessToken, ProviderError> {
            let count = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if let Some(status) = self.token_status {
                return Err(ProviderError::Http {
                    operation: "token exchange",
                    status,
                    body: r#"{"error":"invalid_grant"}"#.into(),
                });
            }
            Ok(AccessToken {
                token: format!("token-{count}-{assertion}"),
                token_type: "Bearer".into(),
                expires_in: 3600,
            })
        }

        async fn user_info(&self, _access_token: &str) -> Result<UserInfo, ProviderError> {
            Ok(UserInfo {
                sub: "U1".into(),
                email: "signer@example.com".into(),
                accounts: self.accounts.clone(),
            })
        }
    }

    fn resolver(exchange: Arc<FakeExchange>) -> CachedAuthResolver {
        CachedAuthResolver::new(Arc::new(CredentialCache::default()), Arc::new(StaticSigner), exchange)
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let exchange = Arc::new(FakeExchange::default());
        let resolver = resolver(Arc::clone(&exchange));
        let principal = Principal::new("U1");

        let first = resolver.resolve(&principal).await.unwrap();
        let second = resolver.resolve(&principal).await.unwrap();

        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(first.access_token(), second.access_token());
        assert_eq!(first.account_id(), "A1");
        assert_eq!(first.ttl, Duration::from_secs(3300));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_a_new_exchange() {
        let exchange = Arc::new(FakeExchange::default());
        let resolver = resolver(Arc::clone(&exchange));
        let principal = Principal::new("U1");

        resolver.resolve(&principal).await.unwrap();
        tokio::time::advance(Duration::from_secs(3300)).await;
        resolver.resolve(&principal).await.unwrap();

        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_for_one_principal_share_an_exchange() {
        let exchange = Arc::new(FakeExchange {
            latency: Duration::from_millis(50),
            ..FakeExchange::default()
        });
        let resolver = Arc::new(resolver(Arc::clone(&exchange)));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            tasks.push(tokio::spawn(async move { resolver.resolve(&Principal::new("U1")).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 1);
        assert!(resolver.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn different_principals_exchange_independently() {
        let exchange = Arc::new(FakeExchange {
            latency: Duration::from_millis(50),
            ..FakeExchange::default()
        });
        let resolver = Arc::new(resolver(Arc::clone(&exchange)));

        let (u1, u2) = (Principal::new("U1"), Principal::new("U2"));
        let (a, b) = tokio::join!(resolver.resolve(&u1), resolver.resolve(&u2));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cache().len().await, 2);
    }

    #[tokio::test]
    async fn rejected_exchange_is_exchange_failed_and_not_cached() {
        let exchange = Arc::new(FakeExchange {
            token_status: Some(401),
            ..FakeExchange::default()
        });
        let resolver = resolver(exchange);

        let error = resolver.resolve(&Principal::new("U1")).await.unwrap_err();
        assert!(matches!(error, AuthError::ExchangeFailed { status: 401, .. }));
        assert!(error.is_retryable());
        assert!(resolver.cache().is_empty().await);
    }

    #[tokio::test]
    async fn user_without_accounts_is_no_account_bound() {
        let exchange = Arc::new(FakeExchange {
            accounts: Vec::new(),
            ..FakeExchange::default()
        });
        let error = resolver(exchange).resolve(&Principal::new("U1")).await.unwrap_err();

        assert_eq!(
            error,
            AuthError::NoAccountBound {
                principal: Principal::new("U1")
            }
        );
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn signing_failure_is_config_invalid() {
        let exchange = Arc::new(FakeExchange::default());
        let resolver = CachedAuthResolver::new(Arc::new(CredentialCache::default()), Arc::new(BrokenSigner), Arc::clone(&exchange) as Arc<dyn TokenExchange>);

        let error = resolver.resolve(&Principal::new("U1")).await.unwrap_err();
        assert_eq!(error.kind(), "ConfigInvalid");
        assert_eq!(exchange.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn untrusted_account_base_uri_is_refused() {
        let exchange = Arc::new(FakeExchange {
            accounts: vec![AccountInfo {
                account_id: "A1".into(),
                is_default: true,
                account_name: String::new(),
                base_uri: "https://evil.example".into(),
            }],
            ..FakeExchange::default()
        });
        let error = resolver(exchange).resolve(&Principal::new("U1")).await.unwrap_err();
        assert!(matches!(error, AuthError::UntrustedBaseUri(_)));
    }
}
