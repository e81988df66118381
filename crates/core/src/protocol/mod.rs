//! Recorder streaming protocol.
//!
//! The recorder speaks a line-free XML micro-protocol over a raw TCP (or
//! TLS) socket. Every message in either direction is terminated by
//! `\r\n\r\n`:
//!
//! ```text
//! client: <?xml ...?><methodcall><requestid>1</requestid><methodname>connect</methodname>...</methodcall>\r\n\r\n
//! server: <?xml ...?><methodresponse>...<connected>yes</connected></methodresponse>\r\n\r\n
//! client: <?xml ...?><methodcall><requestid>2</requestid><methodname>live</methodname></methodcall>\r\n\r\n
//! server: ImageResponse\r\nContent-Length: 5120\r\n...\r\n\r\n<5120 raw bytes>\r\n\r\n
//! server: <?xml ...?><livepackage>...</livepackage>\r\n\r\n
//! ```
//!
//! Image responses carry an HTTP-like header block followed by exactly
//! `content-length` raw bytes; everything else is an XML document.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`framing`] | Delimiter and fixed-length extraction from the socket |
//! | [`request`] | Outgoing `methodcall` envelopes |
//! | [`response`] | Classification of incoming segments |
//! | [`xml`] | quick-xml views shared with the SOAP services |

pub mod framing;
pub mod request;
pub mod response;
pub mod xml;

pub use framing::{DELIMITER, FrameBuffer};
pub use request::{Method, RequestCodec, RequestEnvelope};
pub use response::{FrameKind, classify};
pub use xml::XmlElement;
