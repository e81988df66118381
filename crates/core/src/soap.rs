//! SOAP 1.1 calls over HTTP(S).
//!
//! Shared by the management-server client and the recorder command
//! service. One [`SoapClient`] keeps a pooled `reqwest` client, so
//! consecutive calls reuse the same keep-alive connection. Servers in the
//! field ship self-signed certificates, which are accepted.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;

use crate::protocol::XmlElement;

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Failure of a single SOAP exchange.
#[derive(Debug, thiserror::Error)]
pub enum SoapError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; `detail` is the SOAP fault text when present.
    #[error("{operation} returned HTTP {status}: {detail}")]
    Status {
        operation: String,
        status: u16,
        detail: String,
    },

    #[error("malformed SOAP response: {0}")]
    Malformed(String),
}

impl SoapError {
    /// Whether the server rejected the caller's credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SoapError::Status { status: 401 | 403, .. })
    }
}

/// HTTP-level authentication attached to each request.
#[derive(Clone, Default)]
pub enum HttpAuth {
    #[default]
    None,
    Basic {
        user: String,
        secret: String,
    },
    Bearer(String),
}

impl HttpAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            HttpAuth::None => request,
            HttpAuth::Basic { user, secret } => request.basic_auth(user, Some(secret)),
            HttpAuth::Bearer(token) => request.bearer_auth(token),
        }
    }
}

pub struct SoapClient {
    http: Client,
}

impl SoapClient {
    /// Build a client whose requests give up after `timeout` (`None` waits
    /// forever).
    pub fn new(timeout: Option<Duration>) -> Result<Self, SoapError> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .timeout(timeout);
        if let Some(t) = timeout {
            builder = builder.connect_timeout(t);
        }
        Ok(SoapClient {
            http: builder.build()?,
        })
    }

    /// Fetch a document, such as a service description.
    pub fn get(&self, url: &str, auth: &HttpAuth) -> Result<String, SoapError> {
        let response = auth.apply(self.http.get(url)).send()?;
        let status = response.status();
        let body = response.text()?;
        tracing::debug!(url, status = status.as_u16(), len = body.len(), "GET");
        if !status.is_success() {
            return Err(SoapError::Status {
                operation: format!("GET {url}"),
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("error").to_string(),
            });
        }
        Ok(body)
    }

    /// Invoke `operation` with the already-serialized `arguments` and return
    /// the response element inside the SOAP body.
    pub fn call(
        &self,
        url: &str,
        namespace: &str,
        soap_action: &str,
        operation: &str,
        arguments: &str,
        auth: &HttpAuth,
    ) -> Result<XmlElement, SoapError> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="{ENVELOPE_NS}"><soap:Body><{operation} xmlns="{namespace}">{arguments}</{operation}></soap:Body></soap:Envelope>"#
        );
        let response = auth
            .apply(self.http.post(url))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{soap_action}\""))
            .body(envelope)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        tracing::debug!(url, operation, status = status.as_u16(), len = body.len(), "SOAP call");

        if !status.is_success() {
            let detail = fault_string(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(SoapError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        let root = XmlElement::parse(&body).map_err(SoapError::Malformed)?;
        if let Some(fault) = root.find("Fault") {
            return Err(SoapError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                detail: fault_text(fault),
            });
        }
        root.child("Body")
            .and_then(|b| b.children.first())
            .cloned()
            .ok_or_else(|| SoapError::Malformed(format!("{operation}: empty SOAP body")))
    }
}

/// Fault text of a SOAP 1.1 (`faultstring`) or 1.2 (`Reason/Text`) fault.
fn fault_string(body: &str) -> Option<String> {
    let root = XmlElement::parse(body).ok()?;
    root.find("Fault").map(fault_text)
}

fn fault_text(fault: &XmlElement) -> String {
    fault
        .find("faultstring")
        .or_else(|| fault.find("Reason").and_then(|r| r.find("Text")))
        .map(|e| e.text.trim().to_string())
        .unwrap_or_else(|| "SOAP fault".to_string())
}

/// Loopback HTTP server answering scripted responses, for tests.
#[cfg(test)]
pub(crate) mod stub {
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;

    pub(crate) struct HttpStub {
        pub base: String,
        requests: Arc<Mutex<Vec<String>>>,
        queue: Arc<Mutex<VecDeque<String>>>,
    }

    impl HttpStub {
        /// Serve `responses` in order, one per request, across however many
        /// connections the client opens.
        pub(crate) fn start(responses: Vec<String>) -> HttpStub {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
            let (seen, pending) = (requests.clone(), queue.clone());
            thread::spawn(move || {
                for conn in listener.incoming() {
                    let Ok(conn) = conn else { break };
                    let (seen, pending) = (seen.clone(), pending.clone());
                    thread::spawn(move || serve(conn, &seen, &pending));
                }
            });
            HttpStub {
                base,
                requests,
                queue,
            }
        }

        /// Queue one more response.
        pub(crate) fn push(&self, response: String) {
            self.queue.lock().push_back(response);
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    fn serve(mut conn: TcpStream, seen: &Mutex<Vec<String>>, queue: &Mutex<VecDeque<String>>) {
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut backlog = Vec::new();
        while let Some(request) = read_request(&mut conn, &mut backlog) {
            seen.lock().push(request);
            let reply = queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| status(500, "Internal Server Error", ""));
            if conn.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    }

    /// Head and body of one request, or `None` once the client is gone.
    pub(crate) fn read_request(conn: &mut TcpStream, backlog: &mut Vec<u8>) -> Option<String> {
        let head_end = loop {
            if let Some(pos) = backlog.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            fill(conn, backlog)?;
        };
        let head = String::from_utf8_lossy(&backlog[..head_end]).into_owned();
        let len = header(&head, "content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        while backlog.len() < head_end + 4 + len {
            fill(conn, backlog)?;
        }
        let raw: Vec<u8> = backlog.drain(..head_end + 4 + len).collect();
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    fn fill(conn: &mut TcpStream, backlog: &mut Vec<u8>) -> Option<()> {
        let mut buf = [0u8; 4096];
        match conn.read(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(n) => {
                backlog.extend_from_slice(&buf[..n]);
                Some(())
            }
        }
    }

    /// Value of a request header, matched case-insensitively.
    pub(crate) fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request
            .lines()
            .take_while(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    pub(crate) fn ok(body: &str) -> String {
        status(200, "OK", body)
    }

    pub(crate) fn status(code: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {code} {reason}\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    }

    /// `body` sent with chunked transfer encoding in two chunks.
    pub(crate) fn chunked(body: &str) -> String {
        let (a, b) = body.split_at(body.len() / 2);
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{a}\r\n{:x}\r\n{b}\r\n0\r\n\r\n",
            a.len(),
            b.len()
        )
    }

    pub(crate) fn envelope(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>{inner}</s:Body></s:Envelope>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::stub::{self, HttpStub};
    use super::*;

    const NS: &str = "urn:test";

    fn client() -> SoapClient {
        SoapClient::new(Some(Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn call_returns_response_element() {
        let server = HttpStub::start(vec![stub::ok(&stub::envelope(
            r#"<EchoResponse xmlns="urn:test"><EchoResult>hi</EchoResult></EchoResponse>"#,
        ))]);
        let reply = client()
            .call(
                &format!("{}/svc", server.base),
                NS,
                "urn:test/Echo",
                "Echo",
                "<text>hi &amp; bye</text>",
                &HttpAuth::Basic {
                    user: "op".to_string(),
                    secret: "pw".to_string(),
                },
            )
            .unwrap();
        assert_eq!(reply.name, "EchoResponse");
        assert_eq!(reply.child_text("EchoResult"), Some("hi"));

        let requests = server.requests();
        let request = &requests[0];
        assert!(request.starts_with("POST /svc HTTP/1.1\r\n"));
        assert_eq!(stub::header(request, "soapaction"), Some("\"urn:test/Echo\""));
        assert_eq!(stub::header(request, "content-type"), Some("text/xml; charset=utf-8"));
        // "op:pw" in base64.
        assert_eq!(stub::header(request, "authorization"), Some("Basic b3A6cHc="));
        assert!(request.contains(r#"<Echo xmlns="urn:test"><text>hi &amp; bye</text></Echo>"#));
    }

    #[test]
    fn chunked_response_body_is_decoded() {
        let server = HttpStub::start(vec![stub::chunked(&stub::envelope("<PingResponse/>"))]);
        let reply = client()
            .call(&server.base, NS, "urn:test/Ping", "Ping", "", &HttpAuth::None)
            .unwrap();
        assert_eq!(reply.name, "PingResponse");
    }

    #[test]
    fn fault_text_is_reported() {
        let fault = stub::envelope(
            "<s:Fault><faultcode>s:Server</faultcode><faultstring> Token expired </faultstring></s:Fault>",
        );
        let server = HttpStub::start(vec![
            stub::status(500, "Internal Server Error", &fault),
            stub::status(401, "Unauthorized", ""),
        ]);
        let client = client();
        let err = client
            .call(&server.base, NS, "urn:test/Ping", "Ping", "", &HttpAuth::None)
            .unwrap_err();
        assert!(matches!(&err, SoapError::Status { status: 500, detail, .. } if detail == "Token expired"));
        assert!(!err.is_unauthorized());

        let err = client
            .call(&server.base, NS, "urn:test/Ping", "Ping", "", &HttpAuth::Bearer("t".to_string()))
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(stub::header(&server.requests()[1], "authorization"), Some("Bearer t"));
    }

    #[test]
    fn soap12_fault_reason() {
        let body = r#"<env:Envelope xmlns:env="urn:e"><env:Body><env:Fault><env:Reason><env:Text xml:lang="en">Device busy</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;
        assert_eq!(fault_string(body).as_deref(), Some("Device busy"));
        assert_eq!(fault_string("<ok/>"), None);
    }

    #[test]
    fn empty_body_is_malformed() {
        let server = HttpStub::start(vec![stub::ok(&stub::envelope(""))]);
        let err = client()
            .call(&server.base, NS, "urn:test/Ping", "Ping", "", &HttpAuth::None)
            .unwrap_err();
        assert!(matches!(err, SoapError::Malformed(_)));
    }
}
