//! Network transport to recording servers.
//!
//! The image stream runs over a single TCP connection, wrapped in TLS when
//! the recorder advertises an `https` endpoint. SOAP calls go through
//! [`soap`](crate::soap) instead.
//!
//! - [`tcp`]: dialing with timeouts, the [`RecorderStream`] read/write
//!   type and a [`CloseHandle`] for cross-thread cancellation.
//! - [`tls`]: `rustls` client configuration for recorder certificates.

pub mod tcp;
pub mod tls;

pub use tcp::{CloseHandle, RecorderStream, dial};
