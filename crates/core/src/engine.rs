//! Pull-based live stream from one recorder.
//!
//! [`StreamEngine`] owns everything belonging to a session: the token, the
//! resolved recorder, the socket and its receive backlog. They are created
//! together by [`open`](StreamEngine::open) and dropped together by
//! [`close`](StreamEngine::close) or by a fatal error.
//!
//! ```text
//! Idle -> Resolving -> Connecting -> Handshaking -> Streaming -> Closed
//!            \______________\_____________\____________\_____-> Failed
//! ```
//!
//! `Closed` and `Failed` reject [`next_frame`](StreamEngine::next_frame);
//! calling `open` again starts a fresh session from either.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::StreamConfig;
use crate::directory::{ManagementService, RecorderLocation, resolve_recorder};
use crate::error::{ProtocolErrorKind, Result, StreamError};
use crate::media::GenericByteData;
use crate::protocol::response::is_connect_accepted;
use crate::protocol::{DELIMITER, FrameBuffer, FrameKind, RequestCodec, RequestEnvelope, classify};
use crate::ptz::{CommandConnector, CommandEndpoint, PtzChannel, PtzCommand, PtzHandle, SoapConnector};
use crate::session::{Clock, SessionManager, SystemClock};
use crate::transport::{CloseHandle, RecorderStream, dial};

/// Lifecycle position of a [`StreamEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Resolving,
    Connecting,
    Handshaking,
    Streaming,
    Closed,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Resolving => "resolving",
            EngineState::Connecting => "connecting",
            EngineState::Handshaking => "handshaking",
            EngineState::Streaming => "streaming",
            EngineState::Closed => "closed",
            EngineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One complete image payload, exactly `content-length` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    bytes: Vec<u8>,
}

impl ImageFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        ImageFrame { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Interpret the payload as a Generic Byte Data frame.
    pub fn generic_header(&self) -> Result<GenericByteData<'_>> {
        GenericByteData::parse(&self.bytes)
    }
}

/// Result of one [`StreamEngine::next_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Image(ImageFrame),
    /// The recorder closed the connection.
    EndOfStream,
}

/// Resources of one open session.
struct Connection {
    buffer: FrameBuffer<RecorderStream>,
    close: CloseHandle,
    session: SessionManager,
    location: RecorderLocation,
    camera_id: String,
    codec: RequestCodec,
    live_sent: bool,
    ptz: Arc<PtzChannel>,
}

impl Connection {
    fn send(&mut self, request: &RequestEnvelope) -> Result<()> {
        tracing::debug!(
            request_id = request.request_id,
            method = request.method.as_str(),
            "sending request"
        );
        let stream = self.buffer.get_mut();
        stream.write_all(request.to_xml().as_bytes())?;
        stream.write_all(DELIMITER)?;
        stream.flush()?;
        Ok(())
    }

    /// Renew the token and present it to the recorder once the deadline is
    /// reached. The acknowledgement is consumed by a later read.
    fn renew_if_due(&mut self, service: &mut dyn ManagementService, clock: &dyn Clock) -> Result<()> {
        if !self.session.should_renew(clock.now()) {
            return Ok(());
        }
        let token = self.session.renew(service)?.value.clone();
        if self.session.is_expired(clock.now()) {
            return Err(StreamError::Auth(
                "renewed token has already expired".to_string(),
            ));
        }
        let request = self.codec.connect_update(&self.camera_id, &token);
        self.send(&request)?;
        tracing::info!(
            request_id = request.request_id,
            renewals = self.session.renewals(),
            "sent connectupdate with renewed token"
        );
        Ok(())
    }

    fn next_frame(&mut self, service: &mut dyn ManagementService, clock: &dyn Clock) -> Result<Frame> {
        if !self.live_sent {
            let request = self.codec.live();
            self.send(&request)?;
            self.live_sent = true;
            tracing::info!(camera_id = %self.camera_id, "live streaming requested");
        }

        loop {
            self.renew_if_due(service, clock)?;

            let Some(segment) = self.buffer.read_text()? else {
                return Ok(Frame::EndOfStream);
            };

            match classify(&segment)? {
                FrameKind::ImageHeader { content_length } => {
                    tracing::trace!(content_length, "image header");
                    let Some(bytes) = self.buffer.read_exact(content_length)? else {
                        return Err(StreamError::protocol(ProtocolErrorKind::TruncatedPayload {
                            expected: content_length,
                            received: self.buffer.buffered_len(),
                        }));
                    };
                    return Ok(Frame::Image(ImageFrame::new(bytes)));
                }
                FrameKind::ControlAck { ok: true } => {
                    tracing::debug!("renewed token accepted");
                }
                FrameKind::ControlAck { ok: false } => {
                    return Err(StreamError::Auth(
                        "recorder rejected the renewed token".to_string(),
                    ));
                }
                FrameKind::Heartbeat => {
                    tracing::debug!("heartbeat");
                }
                FrameKind::Unrecognized { raw } => {
                    tracing::warn!(%raw, "ignoring unrecognized response");
                }
                FrameKind::Malformed { raw, reason } => {
                    tracing::warn!(%raw, %reason, "ignoring malformed response");
                }
            }
        }
    }
}

/// Live image stream from the recorder serving one camera.
///
/// `next_frame` must be driven by a single consumer. Other threads may
/// interrupt a blocked read through [`close_handle`](Self::close_handle)
/// and send PTZ commands through [`ptz_handle`](Self::ptz_handle).
pub struct StreamEngine {
    service: Box<dyn ManagementService>,
    clock: Arc<dyn Clock>,
    ptz_connector: Arc<dyn CommandConnector>,
    state: EngineState,
    cause: Option<String>,
    auth_failed: bool,
    conn: Option<Connection>,
}

impl StreamEngine {
    pub fn new(service: Box<dyn ManagementService>) -> Self {
        Self::with_clock(service, Arc::new(SystemClock))
    }

    /// Create an engine that takes renewal decisions from `clock`.
    pub fn with_clock(service: Box<dyn ManagementService>, clock: Arc<dyn Clock>) -> Self {
        StreamEngine {
            service,
            clock,
            ptz_connector: Arc::new(SoapConnector),
            state: EngineState::Idle,
            cause: None,
            auth_failed: false,
            conn: None,
        }
    }

    /// Replace the connector used for the PTZ command channel.
    pub fn with_ptz_connector(mut self, connector: Arc<dyn CommandConnector>) -> Self {
        self.ptz_connector = connector;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Cause of the last failure, if the engine is `Failed`.
    pub fn failure_cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Recorder of the open session.
    pub fn location(&self) -> Option<&RecorderLocation> {
        self.conn.as_ref().map(|c| &c.location)
    }

    /// Token session of the open session.
    pub fn session(&self) -> Option<&SessionManager> {
        self.conn.as_ref().map(|c| &c.session)
    }

    /// Log in, resolve the recorder, dial it and authorize the connection.
    ///
    /// On success the engine is `Streaming`; live delivery starts with the
    /// first [`next_frame`](Self::next_frame). Any failure after validation
    /// leaves the engine `Failed`.
    pub fn open(&mut self, config: StreamConfig) -> Result<()> {
        match self.state {
            EngineState::Idle | EngineState::Closed | EngineState::Failed => {}
            _ => return Err(StreamError::AlreadyOpen),
        }
        config.validate()?;

        self.conn = None;
        self.cause = None;
        self.auth_failed = false;
        match self.establish(&config) {
            Ok(conn) => {
                tracing::info!(
                    camera_id = %conn.camera_id,
                    recorder = %conn.location.address(),
                    instance_id = conn.session.instance_id(),
                    "stream open"
                );
                self.conn = Some(conn);
                self.transition(EngineState::Streaming);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn establish(&mut self, config: &StreamConfig) -> Result<Connection> {
        self.transition(EngineState::Resolving);
        let instance_id = Uuid::new_v4().to_string();
        let session = SessionManager::login(
            self.service.as_mut(),
            config.credentials(),
            &instance_id,
            config.renewal_margin,
        )?;
        let location = resolve_recorder(self.service.as_mut(), &session.token().value, config)?;

        self.transition(EngineState::Connecting);
        let timeout = config.io_timeout();
        let (stream, close) = dial(&location, timeout)?;

        self.transition(EngineState::Handshaking);
        let ptz = Arc::new(PtzChannel::new(
            CommandEndpoint::for_recorder(&location),
            timeout,
            self.ptz_connector.clone(),
        ));
        let mut conn = Connection {
            buffer: FrameBuffer::new(stream),
            close,
            session,
            location,
            camera_id: config.camera_id.clone(),
            codec: RequestCodec::new(),
            live_sent: false,
            ptz,
        };

        let token = conn.session.token().value.clone();
        let request = conn.codec.connect(&conn.camera_id, &token);
        conn.send(&request)?;

        let reply = conn.buffer.read_text()?.ok_or_else(|| {
            StreamError::Connect("recorder closed the connection during connect".to_string())
        })?;
        match is_connect_accepted(&reply) {
            Ok(true) => Ok(conn),
            Ok(false) => Err(StreamError::Connect(format!(
                "recorder refused camera {}",
                conn.camera_id
            ))),
            Err(reason) => Err(StreamError::Connect(format!(
                "unreadable connect response: {reason}"
            ))),
        }
    }

    /// Block until the next image, the end of the stream or a fatal error.
    ///
    /// Heartbeats, renewal acknowledgements and unknown chatter are consumed
    /// here and never returned.
    pub fn next_frame(&mut self) -> Result<Frame> {
        if self.state != EngineState::Streaming {
            return Err(self.not_active());
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(self.not_active());
        };

        match conn.next_frame(self.service.as_mut(), self.clock.as_ref()) {
            Ok(Frame::EndOfStream) => {
                tracing::info!("recorder closed the stream");
                self.conn = None;
                self.transition(EngineState::Closed);
                Ok(Frame::EndOfStream)
            }
            Ok(frame) => Ok(frame),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// End the session and release the socket.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close.close();
        }
        if matches!(self.state, EngineState::Idle | EngineState::Failed) {
            return;
        }
        self.transition(EngineState::Closed);
    }

    /// Handle that unblocks a pending [`next_frame`](Self::next_frame) from
    /// another thread by shutting the socket down.
    pub fn close_handle(&self) -> Option<CloseHandle> {
        self.conn.as_ref().and_then(|c| c.close.try_clone().ok())
    }

    /// Send one PTZ command for the streamed camera. All-zero axes stop.
    ///
    /// Failures are returned and do not affect the stream.
    pub fn send_ptz(&self, x: f64, y: f64, z: f64) -> Result<()> {
        let Some(conn) = self.conn.as_ref().filter(|_| self.state == EngineState::Streaming) else {
            return Err(self.not_active());
        };
        conn.ptz.send(
            &conn.session.token().value,
            &conn.camera_id,
            PtzCommand::from_axes(x, y, z),
        )
    }

    /// PTZ sender usable from other threads, following token renewals.
    pub fn ptz_handle(&self) -> Option<PtzHandle> {
        self.conn
            .as_ref()
            .map(|c| PtzHandle::new(c.ptz.clone(), c.session.token_cell(), &c.camera_id))
    }

    fn not_active(&self) -> StreamError {
        StreamError::SessionNotActive {
            state: self.state,
            cause: self.cause.clone(),
            auth: self.auth_failed,
        }
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        tracing::error!(state = %self.state, error = %err, "session failed");
        if let Some(conn) = self.conn.take() {
            conn.close.close();
        }
        self.cause = Some(err.to_string());
        self.auth_failed = err.is_fatal_auth();
        self.transition(EngineState::Failed);
        err
    }

    fn transition(&mut self, next: EngineState) {
        tracing::debug!(from = %self.state, to = %next, "state change");
        self.state = next;
    }
}
