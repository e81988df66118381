use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Result, StreamError};

/// Port the recorder's image server listens on when the host is given
/// explicitly instead of being resolved.
pub const DEFAULT_RECORDER_PORT: u16 = 7563;

/// Domain value that selects basic (username/password) authentication.
pub const BASIC_DOMAIN: &str = "BASIC";

/// Default connect/receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default safety margin subtracted from a token's lifetime.
pub const DEFAULT_RENEWAL_MARGIN: Duration = Duration::from_secs(120);

/// How the client proves its identity to the management server.
///
/// Opaque to the streaming core: it is only handed to a
/// [`ManagementService`](crate::directory::ManagementService) at login and
/// renewal.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Basic authentication against the management server's own user store.
    Basic { user: String, secret: String },
    /// Integrated (NTLM-style) authentication as `domain\user`.
    Ntlm {
        domain: String,
        user: String,
        secret: String,
    },
    /// A token obtained out of band (e.g. from an OAuth identity provider).
    Bearer { token: String },
}

impl Credentials {
    /// Principal name as presented to the server.
    pub fn principal(&self) -> Option<String> {
        match self {
            Credentials::Basic { user, .. } => Some(user.clone()),
            Credentials::Ntlm { domain, user, .. } => Some(format!("{domain}\\{user}")),
            Credentials::Bearer { .. } => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .finish_non_exhaustive(),
            Credentials::Ntlm { domain, user, .. } => f
                .debug_struct("Ntlm")
                .field("domain", domain)
                .field("user", user)
                .finish_non_exhaustive(),
            Credentials::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

/// Options for opening a stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Management server address (`host` or `host:port`).
    pub management_server: String,
    /// Recorder host. When set, directory resolution is skipped and the
    /// recorder is dialed at [`recorder_port`](Self::recorder_port) in plain TCP.
    pub recorder_host: Option<String>,
    /// Port used together with [`recorder_host`](Self::recorder_host).
    pub recorder_port: u16,
    /// `BASIC` selects basic auth; anything else is an NTLM domain.
    pub domain: String,
    pub user_id: String,
    pub user_secret: String,
    /// Pre-obtained token; takes precedence over user id and secret.
    pub bearer_token: Option<String>,
    /// GUID of the camera to stream.
    pub camera_id: String,
    /// GUID of the hardware the camera belongs to. Speeds up resolution
    /// on large sites.
    pub hardware_id: Option<String>,
    /// Use [`management_server`](Self::management_server) literally instead
    /// of the host the server advertises for its command service.
    pub force_management_address: bool,
    /// Connect and receive timeout. Zero disables it.
    pub timeout: Duration,
    /// Renew the token this long before the server-reported expiry.
    pub renewal_margin: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            management_server: String::new(),
            recorder_host: None,
            recorder_port: DEFAULT_RECORDER_PORT,
            domain: BASIC_DOMAIN.to_string(),
            user_id: String::new(),
            user_secret: String::new(),
            bearer_token: None,
            camera_id: String::new(),
            hardware_id: None,
            force_management_address: false,
            timeout: DEFAULT_TIMEOUT,
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
        }
    }
}

impl StreamConfig {
    /// Reject configurations that cannot possibly open a stream.
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(StreamError::Config(
                "camera id is required (a hardware id alone is not enough)".to_string(),
            ));
        }
        if self.recorder_host.is_none() && self.management_server.trim().is_empty() {
            return Err(StreamError::Config(
                "either a management server or a recorder host is required".to_string(),
            ));
        }
        if matches!(&self.recorder_host, Some(host) if host.trim().is_empty()) {
            return Err(StreamError::Config("recorder host is empty".to_string()));
        }
        Ok(())
    }

    /// Credentials implied by the domain, user and token options.
    pub fn credentials(&self) -> Credentials {
        if let Some(token) = &self.bearer_token {
            return Credentials::Bearer {
                token: token.clone(),
            };
        }
        if self.domain == BASIC_DOMAIN {
            Credentials::Basic {
                user: self.user_id.clone(),
                secret: self.user_secret.clone(),
            }
        } else {
            Credentials::Ntlm {
                domain: self.domain.clone(),
                user: self.user_id.clone(),
                secret: self.user_secret.clone(),
            }
        }
    }

    /// Management command-service endpoint for the configured auth scheme.
    pub fn management_endpoint(&self) -> String {
        let server = &self.management_server;
        match self.credentials() {
            Credentials::Bearer { .. } => {
                format!("https://{server}/ManagementServer/ServerCommandServiceOAuth.svc")
            }
            Credentials::Basic { .. } => {
                format!("https://{server}/ManagementServer/ServerCommandService.svc")
            }
            Credentials::Ntlm { .. } => {
                format!("http://{server}/ServerAPI/ServerCommandService.asmx")
            }
        }
    }

    /// The command-service address to actually call, given the one the
    /// server advertises.
    ///
    /// With `force_management_address`, the advertised host and port are
    /// replaced by [`management_server`](Self::management_server); scheme and
    /// path are kept.
    pub fn effective_service_address(&self, advertised: &str) -> Result<String> {
        if !self.force_management_address {
            return Ok(advertised.to_string());
        }
        let mut url = Url::parse(advertised)
            .map_err(|e| StreamError::Config(format!("advertised address {advertised:?}: {e}")))?;
        let configured = Url::parse(&format!("{}://{}", url.scheme(), self.management_server))
            .map_err(|e| {
                StreamError::Config(format!(
                    "management server {:?}: {e}",
                    self.management_server
                ))
            })?;
        url.set_host(configured.host_str())
            .map_err(|e| StreamError::Config(e.to_string()))?;
        url.set_port(configured.port())
            .map_err(|_| StreamError::Config("cannot set port on advertised address".to_string()))?;
        Ok(url.to_string())
    }

    /// Socket timeout, or `None` when disabled.
    pub fn io_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}
