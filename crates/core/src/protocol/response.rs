use crate::error::{ProtocolErrorKind, Result, StreamError};
use crate::protocol::xml::XmlDocument;

/// What a decoded text segment from the recorder means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// `ImageResponse` header block; `content_length` raw bytes follow.
    ImageHeader { content_length: usize },
    /// Result of a `connectupdate` renewal.
    ControlAck { ok: bool },
    /// Keepalive (`livepackage` or a blank segment).
    Heartbeat,
    /// Well-formed text that matches no known response shape.
    Unrecognized { raw: String },
    /// An XML segment that failed to parse. Logged and skipped.
    Malformed { raw: String, reason: String },
}

const IMAGE_RESPONSE: &str = "ImageResponse";
const XML_PROLOG: &str = "<?xml";

/// Classify one trimmed segment returned by
/// [`FrameBuffer::read_text`](super::FrameBuffer::read_text).
///
/// Only a broken `ImageResponse` header is an error: once its length is
/// unknown the binary payload cannot be skipped and the stream is lost.
pub fn classify(segment: &str) -> Result<FrameKind> {
    if segment.starts_with(IMAGE_RESPONSE) {
        return image_header(segment);
    }

    if segment.starts_with(XML_PROLOG) {
        let doc = match XmlDocument::parse(segment) {
            Ok(doc) => doc,
            Err(reason) => {
                return Ok(FrameKind::Malformed {
                    raw: segment.to_string(),
                    reason,
                });
            }
        };
        return Ok(match doc.root.as_str() {
            "livepackage" => FrameKind::Heartbeat,
            "methodresponse" if doc.child("methodname") == Some("connectupdate") => {
                FrameKind::ControlAck {
                    ok: doc.child("connected") == Some("yes"),
                }
            }
            _ => FrameKind::Unrecognized {
                raw: segment.to_string(),
            },
        });
    }

    if segment.is_empty() {
        return Ok(FrameKind::Heartbeat);
    }

    Ok(FrameKind::Unrecognized {
        raw: segment.to_string(),
    })
}

/// Parse `key: value` lines after the `ImageResponse` line. Keys are
/// case-insensitive.
fn image_header(segment: &str) -> Result<FrameKind> {
    let mut content_length = None;

    for line in segment.lines().skip(1) {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            StreamError::protocol(ProtocolErrorKind::InvalidHeader(line.to_string()))
        })?;
        if key.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            let len = value.parse::<usize>().map_err(|_| {
                StreamError::protocol(ProtocolErrorKind::InvalidContentLength(value.to_string()))
            })?;
            content_length = Some(len);
        }
    }

    let content_length =
        content_length.ok_or(StreamError::protocol(ProtocolErrorKind::MissingContentLength))?;
    Ok(FrameKind::ImageHeader { content_length })
}

/// Check the recorder's answer to the initial `connect`.
pub fn is_connect_accepted(segment: &str) -> std::result::Result<bool, String> {
    let doc = XmlDocument::parse(segment)?;
    Ok(doc.child("connected") == Some("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_header_case_insensitive() {
        let kind = classify(
            "ImageResponse\r\nRequestId: 4\r\nContent-Length: 1234\r\nCurrent: 1700000000000",
        )
        .unwrap();
        assert_eq!(kind, FrameKind::ImageHeader { content_length: 1234 });
    }

    #[test]
    fn image_header_without_length_is_fatal() {
        let err = classify("ImageResponse\r\nRequestId: 4").unwrap_err();
        assert!(matches!(
            err,
            StreamError::Protocol {
                kind: ProtocolErrorKind::MissingContentLength
            }
        ));
    }

    #[test]
    fn image_header_bad_length_is_fatal() {
        let err = classify("ImageResponse\r\ncontent-length: -3").unwrap_err();
        assert!(matches!(
            err,
            StreamError::Protocol {
                kind: ProtocolErrorKind::InvalidContentLength(_)
            }
        ));
        assert!(classify("ImageResponse\r\nno separator here").is_err());
    }

    #[test]
    fn livepackage_is_heartbeat() {
        assert_eq!(
            classify(r#"<?xml version="1.0"?><livepackage/>"#).unwrap(),
            FrameKind::Heartbeat
        );
        assert_eq!(classify("").unwrap(), FrameKind::Heartbeat);
    }

    #[test]
    fn connectupdate_acks() {
        let ok = r#"<?xml version="1.0"?><methodresponse><methodname>connectupdate</methodname><connected>yes</connected></methodresponse>"#;
        let no = r#"<?xml version="1.0"?><methodresponse><methodname>connectupdate</methodname><connected>no</connected></methodresponse>"#;
        let missing = r#"<?xml version="1.0"?><methodresponse><methodname>connectupdate</methodname></methodresponse>"#;
        assert_eq!(classify(ok).unwrap(), FrameKind::ControlAck { ok: true });
        assert_eq!(classify(no).unwrap(), FrameKind::ControlAck { ok: false });
        assert_eq!(classify(missing).unwrap(), FrameKind::ControlAck { ok: false });
    }

    #[test]
    fn other_method_responses_are_unrecognized() {
        let raw = r#"<?xml version="1.0"?><methodresponse><methodname>live</methodname></methodresponse>"#;
        assert!(matches!(
            classify(raw).unwrap(),
            FrameKind::Unrecognized { .. }
        ));
        assert!(matches!(
            classify("HTTP/1.1 400 Bad Request").unwrap(),
            FrameKind::Unrecognized { .. }
        ));
    }

    #[test]
    fn broken_xml_is_not_fatal() {
        assert!(matches!(
            classify("<?xml version=\"1.0\"?><methodresponse>").unwrap(),
            FrameKind::Malformed { .. }
        ));
    }

    #[test]
    fn classification_is_repeatable() {
        let samples = [
            "ImageResponse\r\ncontent-length: 4",
            r#"<?xml version="1.0"?><livepackage/>"#,
            "garbage",
            "",
        ];
        for s in samples {
            assert_eq!(classify(s).unwrap(), classify(s).unwrap());
        }
    }

    #[test]
    fn connect_response() {
        assert_eq!(
            is_connect_accepted(r#"<?xml version="1.0"?><methodresponse><connected>yes</connected></methodresponse>"#),
            Ok(true)
        );
        assert_eq!(
            is_connect_accepted(r#"<?xml version="1.0"?><methodresponse><connected>no</connected></methodresponse>"#),
            Ok(false)
        );
        assert!(is_connect_accepted("not xml <").is_err());
    }
}
