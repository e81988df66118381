use std::fmt;

use quick_xml::escape::escape;

/// Methods the client sends to a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Authorize the connection for a camera.
    Connect,
    /// Present a renewed token for the running connection.
    ConnectUpdate,
    /// Start live image delivery.
    Live,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::ConnectUpdate => "connectupdate",
            Method::Live => "live",
        }
    }
}

/// One outgoing `methodcall` document.
///
/// Serializes to a single line of XML. The connection delimiter is not part
/// of the envelope; the sender appends [`DELIMITER`](super::DELIMITER).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub method: Method,
    /// Camera id and token for `connect` and `connectupdate`.
    authorization: Option<(String, String)>,
}

impl RequestEnvelope {
    /// Unescaped `connectparam` value (`id=<camera>&connectiontoken=<token>`).
    pub fn connect_param(&self) -> Option<String> {
        self.authorization
            .as_ref()
            .map(|(camera_id, token)| format!("id={camera_id}&connectiontoken={token}"))
    }

    pub fn camera_id(&self) -> Option<&str> {
        self.authorization.as_ref().map(|(camera_id, _)| camera_id.as_str())
    }

    pub fn token(&self) -> Option<&str> {
        self.authorization.as_ref().map(|(_, token)| token.as_str())
    }

    /// Serialize to the recorder's XML wire format.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><methodcall>"#);
        xml.push_str(&format!("<requestid>{}</requestid>", self.request_id));
        xml.push_str(&format!("<methodname>{}</methodname>", self.method.as_str()));
        if self.method == Method::Connect {
            // Placeholder credentials; the connection token authorizes the session.
            xml.push_str("<username>a</username><password>a</password><cameraid>a</cameraid>");
            xml.push_str("<alwaysstdjpeg>no</alwaysstdjpeg>");
        }
        if let Some((camera_id, token)) = &self.authorization {
            xml.push_str(&format!(
                "<connectparam>id={}&amp;connectiontoken={}</connectparam>",
                escape(camera_id.as_str()),
                escape(token.as_str())
            ));
        }
        xml.push_str("</methodcall>");
        xml
    }
}

impl fmt::Display for RequestEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

/// Builds request envelopes with strictly increasing request ids.
///
/// The recorder does not reliably echo ids, so nothing correlates
/// responses to requests; the id only has to be unique per connection.
#[derive(Debug)]
pub struct RequestCodec {
    next_id: u64,
}

impl RequestCodec {
    pub fn new() -> Self {
        RequestCodec { next_id: 1 }
    }

    pub fn connect(&mut self, camera_id: &str, token: &str) -> RequestEnvelope {
        self.envelope(Method::Connect, camera_id, token)
    }

    pub fn connect_update(&mut self, camera_id: &str, token: &str) -> RequestEnvelope {
        self.envelope(Method::ConnectUpdate, camera_id, token)
    }

    pub fn live(&mut self) -> RequestEnvelope {
        RequestEnvelope {
            request_id: self.take_id(),
            method: Method::Live,
            authorization: None,
        }
    }

    /// Id that the next envelope will carry.
    pub fn peek_id(&self) -> u64 {
        self.next_id
    }

    fn envelope(&mut self, method: Method, camera_id: &str, token: &str) -> RequestEnvelope {
        RequestEnvelope {
            request_id: self.take_id(),
            method,
            authorization: Some((camera_id.to_string(), token.to_string())),
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for RequestCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xml::XmlDocument;

    #[test]
    fn connect_envelope() {
        let mut codec = RequestCodec::new();
        let req = codec.connect("abc", "xyz");
        assert_eq!(req.request_id, 1);
        assert_eq!(
            req.connect_param().as_deref(),
            Some("id=abc&connectiontoken=xyz")
        );
        assert_eq!(req.camera_id(), Some("abc"));
        assert_eq!(req.token(), Some("xyz"));

        let xml = req.to_xml();
        assert!(!xml.contains('\n'));
        assert!(xml.contains("<requestid>1</requestid>"));
        assert!(xml.contains("<methodname>connect</methodname>"));
        assert!(xml.contains("<alwaysstdjpeg>no</alwaysstdjpeg>"));
        assert!(xml.contains("<connectparam>id=abc&amp;connectiontoken=xyz</connectparam>"));

        let doc = XmlDocument::parse(&xml).unwrap();
        assert_eq!(doc.root, "methodcall");
        assert_eq!(doc.child("connectparam"), Some("id=abc&connectiontoken=xyz"));
    }

    #[test]
    fn ids_strictly_increase() {
        let mut codec = RequestCodec::new();
        let ids = [
            codec.connect("c", "t").request_id,
            codec.live().request_id,
            codec.connect_update("c", "t2").request_id,
            codec.connect_update("c", "t3").request_id,
        ];
        assert_eq!(ids, [1, 2, 3, 4]);
        assert_eq!(codec.peek_id(), 5);
    }

    #[test]
    fn connect_update_omits_login_fields() {
        let xml = RequestCodec::new().connect_update("cam", "tok").to_xml();
        assert!(xml.contains("<methodname>connectupdate</methodname>"));
        assert!(!xml.contains("<username>"));
        assert!(xml.contains("id=cam&amp;connectiontoken=tok"));
    }

    #[test]
    fn live_has_no_params() {
        let live = RequestCodec::new().live();
        assert_eq!(live.connect_param(), None);
        let xml = live.to_xml();
        assert!(xml.ends_with("<methodname>live</methodname></methodcall>"));
    }

    #[test]
    fn user_values_are_escaped() {
        let xml = RequestCodec::new().connect("a<b", "t&k").to_xml();
        assert!(xml.contains("id=a&lt;b&amp;connectiontoken=t&amp;k"));
        XmlDocument::parse(&xml).unwrap();
    }
}
