//! Error types for the recorder streaming client.

use std::fmt;

use crate::engine::EngineState;

/// Errors that can occur while resolving, connecting to, or streaming from
/// a recording server.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Directory**: [`Resolution`](Self::Resolution): the recorder for the
///   requested camera could not be located.
/// - **Authorization**: [`Auth`](Self::Auth): login, renewal or a
///   `connectupdate` was rejected.
/// - **Transport**: [`Connect`](Self::Connect), [`Io`](Self::Io),
///   [`Tls`](Self::Tls): dial, handshake and socket failures.
/// - **Framing**: [`Protocol`](Self::Protocol): the byte stream can no
///   longer be trusted to be in sync.
/// - **Lifecycle**: [`SessionNotActive`](Self::SessionNotActive),
///   [`AlreadyOpen`](Self::AlreadyOpen).
///
/// A clean close by the peer is not an error; it surfaces as
/// [`Frame::EndOfStream`](crate::Frame::EndOfStream).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The directory lookup failed or did not find a recorder.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Login, token renewal or `connectupdate` was rejected.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Dial or connect handshake with the recorder failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The recorder sent something that desynchronizes the framing.
    #[error("protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// `next_frame` (or a PTZ command) was called outside the streaming state.
    #[error("session not active ({state:?}){}", describe_cause(.cause))]
    SessionNotActive {
        state: EngineState,
        /// Human-readable cause of the failure that ended the session, if any.
        cause: Option<String>,
        /// The session ended because its credentials were rejected.
        auth: bool,
    },

    /// [`StreamEngine::open`](crate::StreamEngine::open) was called on a live session.
    #[error("session already open")]
    AlreadyOpen,

    /// The supplied configuration is incomplete or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A PTZ command could not be delivered or was rejected.
    #[error("PTZ command failed: {0}")]
    Ptz(String),

    /// TLS setup with the recorder failed.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub(crate) fn protocol(kind: ProtocolErrorKind) -> Self {
        StreamError::Protocol { kind }
    }

    /// Whether this error means the session's credentials are no longer
    /// accepted, either directly or as the reason the session ended.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(
            self,
            StreamError::Auth(_) | StreamError::SessionNotActive { auth: true, .. }
        )
    }
}

fn describe_cause(cause: &Option<String>) -> String {
    cause.as_deref().map(|c| format!(": {c}")).unwrap_or_default()
}

/// Specific kind of framing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// An `ImageResponse` header block had no `content-length`.
    MissingContentLength,
    /// The `content-length` value was not a non-negative integer.
    InvalidContentLength(String),
    /// A header line did not contain a `: ` separator.
    InvalidHeader(String),
    /// The peer closed the socket in the middle of a binary payload.
    TruncatedPayload { expected: usize, received: usize },
    /// Too many consecutive segments could not be decoded as text.
    UndecodableSegments(usize),
    /// An image payload was too short to carry a Generic Byte Data header.
    ShortGenericHeader(usize),
}

impl fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingContentLength => write!(f, "image header without content-length"),
            Self::InvalidContentLength(v) => write!(f, "invalid content-length {v:?}"),
            Self::InvalidHeader(line) => write!(f, "invalid header line {line:?}"),
            Self::TruncatedPayload { expected, received } => {
                write!(f, "payload truncated after {received} of {expected} bytes")
            }
            Self::UndecodableSegments(n) => write!(f, "{n} consecutive undecodable segments"),
            Self::ShortGenericHeader(len) => {
                write!(f, "payload of {len} bytes is shorter than a generic byte data header")
            }
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
