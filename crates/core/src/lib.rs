//! Live image streaming from XProtect recording servers.
//!
//! ```no_run
//! use std::time::Duration;
//! use xprotect::{Frame, StaticTokenService, StreamConfig, StreamEngine};
//!
//! let service = StaticTokenService::new(Duration::from_secs(3600));
//! let mut engine = StreamEngine::new(Box::new(service));
//! engine.open(StreamConfig {
//!     recorder_host: Some("recorder.local".to_string()),
//!     bearer_token: Some("token".to_string()),
//!     camera_id: "3F2504E0-4F89-11D3-9A0C-0305E82C3301".to_string(),
//!     ..StreamConfig::default()
//! })?;
//! while let Frame::Image(image) = engine.next_frame()? {
//!     println!("{} bytes", image.len());
//! }
//! # Ok::<(), xprotect::StreamError>(())
//! ```

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod management;
pub mod media;
pub mod protocol;
pub mod ptz;
pub mod session;
pub mod soap;
pub mod transport;

pub use config::{Credentials, StreamConfig};
pub use directory::{ManagementService, RecorderLocation, StaticTokenService};
pub use engine::{EngineState, Frame, ImageFrame, StreamEngine};
pub use error::{ProtocolErrorKind, Result, StreamError};
pub use management::ServerCommandClient;
pub use media::GenericByteData;
pub use ptz::{PtzCommand, PtzHandle};
pub use session::{Clock, SystemClock};
