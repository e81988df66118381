//! Authorization session with the management server.
//!
//! The recorder accepts a connection token issued by the management
//! server. Tokens expire; the session renews proactively once
//! `registration_time + time_to_live - margin` has passed:
//!
//! ```text
//! login        -> token, deadline = registration + ttl - margin
//! now >= deadline
//! login(token) -> token', deadline'   (then the engine sends connectupdate)
//! ```
//!
//! The margin is capped at half the token lifetime, so a short-lived token
//! is still used for a while before being renewed.
//!
//! There is no timer thread. The engine calls
//! [`should_renew`](SessionManager::should_renew) before every blocking
//! read, so renewal latency is bounded by the inter-frame interval.

pub mod clock;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

use crate::config::Credentials;
use crate::directory::{LoginGrant, ManagementService};
use crate::error::{Result, StreamError};
pub use clock::{Clock, SystemClock};

/// Current connection token and its timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub value: String,
    /// Absolute time the server stops honouring the token.
    pub expiry: DateTime<Utc>,
    /// `expiry - margin`, margin capped at half the lifetime; renewal is
    /// due from this point.
    pub renewal_deadline: DateTime<Utc>,
}

impl SessionToken {
    fn from_grant(grant: LoginGrant, margin: Duration) -> Self {
        let margin = clamp_margin(grant.time_to_live, margin);
        let ttl = TimeDelta::from_std(grant.time_to_live).unwrap_or(TimeDelta::MAX);
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        let expiry = grant
            .registration_time
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let renewal_deadline = expiry
            .checked_sub_signed(margin)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        SessionToken {
            value: grant.token,
            expiry,
            renewal_deadline,
        }
    }
}

fn clamp_margin(ttl: Duration, margin: Duration) -> Duration {
    let limit = ttl / 2;
    if margin <= limit {
        return margin;
    }
    tracing::warn!(
        margin_secs = margin.as_secs(),
        ttl_secs = ttl.as_secs(),
        "renewal margin exceeds half the token lifetime, using half"
    );
    limit
}

/// Read-only view of the current token value, shareable across threads.
///
/// Handed to side channels (PTZ) that must present the same token the
/// stream is using, including after renewals.
#[derive(Debug, Clone)]
pub struct TokenCell(Arc<RwLock<String>>);

impl TokenCell {
    pub fn get(&self) -> String {
        self.0.read().clone()
    }
}

/// Owns the token and the renewal deadline for one streaming session.
pub struct SessionManager {
    credentials: Credentials,
    instance_id: String,
    margin: Duration,
    token: SessionToken,
    shared: Arc<RwLock<String>>,
    renewals: u64,
}

impl SessionManager {
    /// Perform the initial login.
    pub fn login(
        service: &mut dyn ManagementService,
        credentials: Credentials,
        instance_id: &str,
        margin: Duration,
    ) -> Result<Self> {
        tracing::info!(instance_id, "performing login");
        let grant = service
            .login(&credentials, instance_id, None)
            .map_err(|e| as_auth("login", e))?;
        let token = SessionToken::from_grant(grant, margin);
        tracing::debug!(deadline = %token.renewal_deadline, expiry = %token.expiry, "logged in");
        Ok(SessionManager {
            shared: Arc::new(RwLock::new(token.value.clone())),
            credentials,
            instance_id: instance_id.to_string(),
            margin,
            token,
            renewals: 0,
        })
    }

    /// Re-authenticate with the current token as a hint and move the deadline.
    pub fn renew(&mut self, service: &mut dyn ManagementService) -> Result<&SessionToken> {
        tracing::info!(instance_id = %self.instance_id, "renewing token");
        let grant = service
            .login(&self.credentials, &self.instance_id, Some(&self.token.value))
            .map_err(|e| as_auth("token renewal", e))?;
        self.token = SessionToken::from_grant(grant, self.margin);
        *self.shared.write() = self.token.value.clone();
        self.renewals += 1;
        tracing::debug!(deadline = %self.token.renewal_deadline, renewals = self.renewals, "token renewed");
        Ok(&self.token)
    }

    /// Whether the renewal deadline has been reached.
    pub fn should_renew(&self, now: DateTime<Utc>) -> bool {
        now >= self.token.renewal_deadline
    }

    /// Whether the token has already expired server-side.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.token.expiry
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn token_cell(&self) -> TokenCell {
        TokenCell(self.shared.clone())
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Number of successful renewals so far.
    pub fn renewals(&self) -> u64 {
        self.renewals
    }
}

fn as_auth(what: &str, err: StreamError) -> StreamError {
    match err {
        StreamError::Auth(_) => err,
        other => StreamError::Auth(format!("{what} failed: {other}")),
    }
}
