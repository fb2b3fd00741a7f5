// Bearer credential model and the provider seam.
//
// The OAuth consent flow and token persistence live outside this crate.
// Transport code only needs "give me a token for this identity" and
// "refresh this token", which is what `CredentialProvider` captures.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// Tokens expiring within this margin are refreshed before use.
pub const REFRESH_MARGIN: TimeDelta = TimeDelta::seconds(60);

/// A bearer credential for one user identity.
#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: String,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    /// Absolute expiry. `None` means the lifetime is unknown.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(identity: impl Into<String>, access_token: SecretString) -> Self {
        Self {
            identity: identity.into(),
            access_token: Some(access_token),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Remaining lifetime relative to `now`, if the expiry is known.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.expires_at.map(|at| at - now)
    }

    /// Whether this credential must be refreshed before the next request.
    ///
    /// True when the token is missing, the lifetime is unknown, or the
    /// remaining lifetime is at or below `margin`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        self.remaining(now).is_none_or(|left| left <= margin)
    }

    /// `Authorization` header value. Fails when no token is present.
    pub(crate) fn bearer(&self) -> Result<String, Error> {
        let token = self.access_token.as_ref().ok_or_else(|| Error::Authentication {
            message: format!("no access token available for user {}", self.identity),
        })?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }
}

/// Supplies and refreshes bearer credentials.
///
/// Implementations typically wrap an OAuth token store. `refresh` performs
/// network I/O and must fail with [`Error::Authentication`] when the token
/// cannot be renewed.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn valid_token(&self, identity: &str) -> Result<Credential, Error>;

    async fn refresh(&self, credential: &Credential) -> Result<Credential, Error>;
}

// ── StaticTokenProvider ──────────────────────────────────────────────

/// Provider for a token obtained out of band (developer portal, env var).
///
/// The token never changes. A "refresh" re-stamps the expiry `lifetime`
/// into the future so the transport stops asking until it nears expiry.
#[derive(Debug)]
pub struct StaticTokenProvider {
    identity: String,
    token: SecretString,
    lifetime: TimeDelta,
    expires_at: Mutex<Option<DateTime<Utc>>>,
}

impl StaticTokenProvider {
    pub fn new(identity: impl Into<String>, token: SecretString) -> Self {
        Self {
            identity: identity.into(),
            token,
            lifetime: TimeDelta::hours(24),
            expires_at: Mutex::new(None),
        }
    }

    pub fn with_lifetime(mut self, lifetime: TimeDelta) -> Self {
        self.lifetime = lifetime;
        self
    }

    fn current(&self) -> Credential {
        let expires_at = *self.expires_at.lock().expect("token expiry lock poisoned");
        Credential {
            identity: self.identity.clone(),
            access_token: Some(self.token.clone()),
            refresh_token: None,
            expires_at,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn valid_token(&self, identity: &str) -> Result<Credential, Error> {
        if identity != self.identity {
            return Err(Error::Authentication {
                message: format!("no token configured for user {identity}"),
            });
        }
        Ok(self.current())
    }

    async fn refresh(&self, _credential: &Credential) -> Result<Credential, Error> {
        let expires_at = Utc::now() + self.lifetime;
        *self.expires_at.lock().expect("token expiry lock poisoned") = Some(expires_at);
        Ok(self.current())
    }
}
