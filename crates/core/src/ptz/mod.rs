//! Pan/tilt/zoom control through the recorder's command service.
//!
//! PTZ commands do not travel on the image connection. The recorder's
//! command service listens on the same host and port under
//! `/RecorderCommandService/RecorderCommandService.asmx`; a
//! [`PtzChannel`] dials it lazily on the first command and keeps the
//! connection for later ones. Failures are reported to the caller and never
//! touch the streaming session.

pub mod command;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::directory::RecorderLocation;
use crate::error::{Result, StreamError};
use crate::session::TokenCell;
pub use command::{SoapCommandClient, SoapConnector};

const COMMAND_SERVICE_PATH: &str = "/RecorderCommandService/RecorderCommandService.asmx";

/// Directional move with unnormalized speeds.
///
/// Directions are -1, 0 or +1 per axis; speeds are magnitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzMove {
    pub pan: i8,
    pub tilt: i8,
    pub zoom: i8,
    pub pan_speed: f64,
    pub tilt_speed: f64,
    pub zoom_speed: f64,
}

impl PtzMove {
    /// `(axis, direction)` and `(axis, speed)` pairs to send.
    ///
    /// Pan and tilt take precedence: when either moves, zoom is left out;
    /// zoom is only commanded on its own.
    pub fn arguments(&self) -> (Vec<(&'static str, i8)>, Vec<(&'static str, f64)>) {
        if self.pan != 0 || self.tilt != 0 {
            (
                vec![("pan", self.pan), ("tilt", self.tilt)],
                vec![("pan", self.pan_speed), ("tilt", self.tilt_speed)],
            )
        } else {
            (vec![("zoom", self.zoom)], vec![("zoom", self.zoom_speed)])
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PtzCommand {
    Stop,
    Move(PtzMove),
}

impl PtzCommand {
    /// Map requested axis values to a command: the sign gives the direction
    /// and the magnitude the speed. All-zero means stop.
    pub fn from_axes(x: f64, y: f64, z: f64) -> Self {
        if x == 0.0 && y == 0.0 && z == 0.0 {
            return PtzCommand::Stop;
        }
        PtzCommand::Move(PtzMove {
            pan: direction(x),
            tilt: direction(y),
            zoom: direction(z),
            pan_speed: x.abs(),
            tilt_speed: y.abs(),
            zoom_speed: z.abs(),
        })
    }
}

fn direction(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Address of a recorder's command service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub path: String,
}

impl CommandEndpoint {
    pub fn for_recorder(location: &RecorderLocation) -> Self {
        CommandEndpoint {
            host: location.host.clone(),
            port: location.port,
            tls: location.tls,
            path: COMMAND_SERVICE_PATH.to_string(),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Connected command-service client.
pub trait CommandClient: Send {
    fn move_stop(&mut self, token: &str, device_id: &str) -> Result<()>;

    fn move_start(&mut self, token: &str, device_id: &str, movement: &PtzMove) -> Result<()>;
}

/// Opens [`CommandClient`]s.
pub trait CommandConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &CommandEndpoint,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn CommandClient>>;
}

/// Lazily connected command channel to one recorder.
pub struct PtzChannel {
    endpoint: CommandEndpoint,
    timeout: Option<Duration>,
    connector: Arc<dyn CommandConnector>,
    client: Mutex<Option<Box<dyn CommandClient>>>,
}

impl PtzChannel {
    pub fn new(
        endpoint: CommandEndpoint,
        timeout: Option<Duration>,
        connector: Arc<dyn CommandConnector>,
    ) -> Self {
        PtzChannel {
            endpoint,
            timeout,
            connector,
            client: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &CommandEndpoint {
        &self.endpoint
    }

    /// Whether the command connection has been established.
    pub fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }

    pub fn stop(&self, token: &str, device_id: &str) -> Result<()> {
        self.send(token, device_id, PtzCommand::Stop)
    }

    pub fn move_start(&self, token: &str, device_id: &str, movement: PtzMove) -> Result<()> {
        self.send(token, device_id, PtzCommand::Move(movement))
    }

    /// Deliver one command, dialing first if needed. A failed command
    /// drops the connection so the next one redials.
    pub fn send(&self, token: &str, device_id: &str, command: PtzCommand) -> Result<()> {
        let mut guard = self.client.lock();
        if guard.is_none() {
            tracing::info!(endpoint = %self.endpoint.url(), "connecting to recorder command service");
            *guard = Some(self.connector.connect(&self.endpoint, self.timeout)?);
        }
        let Some(client) = guard.as_mut() else {
            return Err(StreamError::Ptz("command client unavailable".to_string()));
        };

        tracing::info!(device_id, ?command, "sending PTZ command");
        let result = match &command {
            PtzCommand::Stop => client.move_stop(token, device_id),
            PtzCommand::Move(movement) => client.move_start(token, device_id, movement),
        };
        if let Err(e) = &result {
            tracing::warn!(device_id, error = %e, "PTZ command failed");
            *guard = None;
        }
        result
    }
}

/// Cloneable PTZ sender bound to one camera and the session's live token.
///
/// Usable from any thread while the engine keeps streaming.
#[derive(Clone)]
pub struct PtzHandle {
    channel: Arc<PtzChannel>,
    token: TokenCell,
    device_id: String,
}

impl PtzHandle {
    pub fn new(channel: Arc<PtzChannel>, token: TokenCell, device_id: &str) -> Self {
        PtzHandle {
            channel,
            token,
            device_id: device_id.to_string(),
        }
    }

    /// Send the command for the given axis values (see [`PtzCommand::from_axes`]).
    pub fn send_axes(&self, x: f64, y: f64, z: f64) -> Result<()> {
        self.send(PtzCommand::from_axes(x, y, z))
    }

    pub fn send(&self, command: PtzCommand) -> Result<()> {
        self.channel.send(&self.token.get(), &self.device_id, command)
    }

    pub fn channel(&self) -> &PtzChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorded {
        dials: AtomicUsize,
        calls: Mutex<Vec<String>>,
        fail_next: Mutex<bool>,
    }

    struct FakeConnector(Arc<Recorded>);

    struct FakeClient(Arc<Recorded>);

    impl CommandConnector for FakeConnector {
        fn connect(
            &self,
            _endpoint: &CommandEndpoint,
            _timeout: Option<Duration>,
        ) -> Result<Box<dyn CommandClient>> {
            self.0.dials.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeClient(self.0.clone())))
        }
    }

    impl CommandClient for FakeClient {
        fn move_stop(&mut self, token: &str, device_id: &str) -> Result<()> {
            self.0.calls.lock().push(format!("stop {token} {device_id}"));
            Ok(())
        }

        fn move_start(&mut self, token: &str, device_id: &str, movement: &PtzMove) -> Result<()> {
            if std::mem::take(&mut *self.0.fail_next.lock()) {
                return Err(StreamError::Ptz("rejected".to_string()));
            }
            let (dirs, _) = movement.arguments();
            self.0
                .calls
                .lock()
                .push(format!("move {token} {device_id} {dirs:?}"));
            Ok(())
        }
    }

    fn channel(rec: &Arc<Recorded>) -> PtzChannel {
        let endpoint = CommandEndpoint::for_recorder(&RecorderLocation {
            host: "rec".to_string(),
            port: 7563,
            tls: false,
        });
        PtzChannel::new(endpoint, None, Arc::new(FakeConnector(rec.clone())))
    }

    #[test]
    fn axes_to_command() {
        assert_eq!(PtzCommand::from_axes(0.0, 0.0, 0.0), PtzCommand::Stop);
        let PtzCommand::Move(m) = PtzCommand::from_axes(-0.5, 0.25, 0.0) else {
            panic!("expected move");
        };
        assert_eq!((m.pan, m.tilt, m.zoom), (-1, 1, 0));
        assert_eq!((m.pan_speed, m.tilt_speed), (0.5, 0.25));
    }

    #[test]
    fn pan_tilt_take_precedence_over_zoom() {
        let PtzCommand::Move(m) = PtzCommand::from_axes(1.0, 0.0, 1.0) else {
            panic!("expected move");
        };
        assert_eq!(m.arguments().0, vec![("pan", 1), ("tilt", 0)]);

        let PtzCommand::Move(m) = PtzCommand::from_axes(0.0, 0.0, -2.0) else {
            panic!("expected move");
        };
        assert_eq!(m.arguments(), (vec![("zoom", -1)], vec![("zoom", 2.0)]));
    }

    #[test]
    fn endpoint_url() {
        let ep = CommandEndpoint::for_recorder(&RecorderLocation {
            host: "rec".to_string(),
            port: 443,
            tls: true,
        });
        assert_eq!(
            ep.url(),
            "https://rec:443/RecorderCommandService/RecorderCommandService.asmx"
        );
    }

    #[test]
    fn dials_lazily_once() {
        let rec = Arc::new(Recorded::default());
        let ch = channel(&rec);
        assert!(!ch.is_connected());
        assert_eq!(rec.dials.load(Ordering::SeqCst), 0);

        ch.stop("t1", "cam").unwrap();
        ch.send("t2", "cam", PtzCommand::from_axes(0.0, 0.0, 1.0))
            .unwrap();
        assert!(ch.is_connected());
        assert_eq!(rec.dials.load(Ordering::SeqCst), 1);
        assert_eq!(
            *rec.calls.lock(),
            vec![
                "stop t1 cam".to_string(),
                "move t2 cam [(\"zoom\", 1)]".to_string()
            ]
        );
    }

    #[test]
    fn failure_forces_redial() {
        let rec = Arc::new(Recorded::default());
        let ch = channel(&rec);
        *rec.fail_next.lock() = true;
        assert!(ch.send("t", "cam", PtzCommand::from_axes(1.0, 0.0, 0.0)).is_err());
        assert!(!ch.is_connected());
        ch.send("t", "cam", PtzCommand::from_axes(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(rec.dials.load(Ordering::SeqCst), 2);
    }
}
