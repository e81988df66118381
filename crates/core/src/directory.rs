//! Site directory: login and recorder lookup.
//!
//! The management server's wire format is not handled here. A
//! [`ManagementService`] implementation performs the actual calls (see
//! [`ServerCommandClient`](crate::management::ServerCommandClient));
//! [`resolve_recorder`] applies the lookup rules on top of it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::config::{Credentials, StreamConfig};
use crate::error::{Result, StreamError};

/// Result of a successful login or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    /// Server time the token was registered.
    pub registration_time: DateTime<Utc>,
    /// Server-reported lifetime counted from `registration_time`.
    pub time_to_live: Duration,
}

/// Network location of the recorder serving a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderLocation {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl RecorderLocation {
    /// Parse the web server URI a recorder advertises
    /// (e.g. `https://rec01:7563/`). `https` selects TLS.
    pub fn from_web_server_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| StreamError::Resolution(format!("recorder uri {uri:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| StreamError::Resolution(format!("recorder uri {uri:?} has no host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| StreamError::Resolution(format!("recorder uri {uri:?} has no port")))?;
        Ok(RecorderLocation {
            host,
            port,
            tls: url.scheme() == "https",
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hardware (device) configuration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub hardware_id: String,
    pub recorder_id: String,
    /// GUIDs of the cameras and other devices on this hardware.
    pub device_ids: Vec<String>,
}

/// Recording server entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderInfo {
    pub recorder_id: String,
    pub name: String,
    pub web_server_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub device_id: String,
    pub hardware_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecorder {
    pub info: RecorderInfo,
    pub cameras: Vec<CameraInfo>,
}

/// Complete site configuration as returned by the management server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteConfiguration {
    pub recorders: Vec<SiteRecorder>,
}

/// Management-server capability injected into the engine.
///
/// Implementations own the transport and the authentication mechanics
/// (basic, NTLM, OAuth); the engine only needs tokens and lookups.
pub trait ManagementService: Send {
    /// Log in, or renew when `current_token` is given.
    fn login(
        &mut self,
        credentials: &Credentials,
        instance_id: &str,
        current_token: Option<&str>,
    ) -> Result<LoginGrant>;

    /// Look up one hardware entry. `Ok(None)` when the id is unknown.
    fn hardware(&mut self, token: &str, hardware_id: &str) -> Result<Option<HardwareInfo>>;

    fn recorder_info(&mut self, token: &str, recorder_id: &str) -> Result<RecorderInfo>;

    fn site_configuration(&mut self, token: &str) -> Result<SiteConfiguration>;
}

/// Locate the recorder for the configured camera.
///
/// 1. A configured recorder host wins outright (plain TCP on the configured port).
/// 2. With a hardware id, the hardware is looked up directly and the camera
///    must be one of its devices.
/// 3. Otherwise the whole site configuration is scanned; the first recorder
///    listing the camera wins.
///
/// GUID comparisons are case-insensitive.
pub fn resolve_recorder(
    service: &mut dyn ManagementService,
    token: &str,
    config: &StreamConfig,
) -> Result<RecorderLocation> {
    if let Some(host) = &config.recorder_host {
        tracing::debug!(host = %host, port = config.recorder_port, "using configured recorder");
        return Ok(RecorderLocation {
            host: host.clone(),
            port: config.recorder_port,
            tls: false,
        });
    }

    let camera_id = config.camera_id.as_str();

    let uri = match config.hardware_id.as_deref().filter(|id| !id.is_empty()) {
        Some(hardware_id) => {
            tracing::info!(hardware_id, "looking up hardware");
            let hardware = lookup("hardware lookup", service.hardware(token, hardware_id))?
                .ok_or_else(|| StreamError::Resolution(format!("hardware {hardware_id} not found")))?;
            if !camera_id.is_empty()
                && !hardware
                    .device_ids
                    .iter()
                    .any(|id| id.eq_ignore_ascii_case(camera_id))
            {
                return Err(StreamError::Resolution(format!(
                    "camera {camera_id} not found on hardware {hardware_id}"
                )));
            }
            lookup("recorder lookup", service.recorder_info(token, &hardware.recorder_id))?
                .web_server_uri
        }
        None => {
            tracing::info!("no hardware id, scanning site configuration");
            let site = lookup("site configuration", service.site_configuration(token))?;
            find_camera(&site, camera_id)
                .ok_or_else(|| {
                    StreamError::Resolution(format!("no recorder found for camera {camera_id}"))
                })?
                .web_server_uri
                .clone()
        }
    };

    let location = RecorderLocation::from_web_server_uri(&uri)?;
    tracing::info!(host = %location.host, port = location.port, tls = location.tls, "recorder resolved");
    Ok(location)
}

/// Directory failures surface as `Resolution`; authorization failures are
/// kept so a rejected token stays recognizable.
fn lookup<T>(what: &str, result: Result<T>) -> Result<T> {
    result.map_err(|err| match err {
        StreamError::Resolution(_) | StreamError::Auth(_) => err,
        other => StreamError::Resolution(format!("{what} failed: {other}")),
    })
}

/// First recorder whose camera list contains `camera_id`.
pub fn find_camera<'a>(site: &'a SiteConfiguration, camera_id: &str) -> Option<&'a RecorderInfo> {
    site.recorders
        .iter()
        .find(|r| {
            r.cameras
                .iter()
                .any(|c| c.device_id.eq_ignore_ascii_case(camera_id))
        })
        .map(|r| &r.info)
}

/// [`ManagementService`] for a token obtained out of band.
///
/// Login and renewal hand the bearer token back with a fixed lifetime.
/// There is no directory behind it, so it must be combined with
/// [`StreamConfig::recorder_host`].
#[derive(Debug, Clone)]
pub struct StaticTokenService {
    time_to_live: Duration,
}

impl StaticTokenService {
    pub fn new(time_to_live: Duration) -> Self {
        StaticTokenService { time_to_live }
    }
}

impl ManagementService for StaticTokenService {
    fn login(
        &mut self,
        credentials: &Credentials,
        _instance_id: &str,
        _current_token: Option<&str>,
    ) -> Result<LoginGrant> {
        match credentials {
            Credentials::Bearer { token } => Ok(LoginGrant {
                token: token.clone(),
                registration_time: Utc::now(),
                time_to_live: self.time_to_live,
            }),
            _ => Err(StreamError::Auth(
                "a static token service needs bearer credentials".to_string(),
            )),
        }
    }

    fn hardware(&mut self, _token: &str, _hardware_id: &str) -> Result<Option<HardwareInfo>> {
        Err(no_directory())
    }

    fn recorder_info(&mut self, _token: &str, _recorder_id: &str) -> Result<RecorderInfo> {
        Err(no_directory())
    }

    fn site_configuration(&mut self, _token: &str) -> Result<SiteConfiguration> {
        Err(no_directory())
    }
}

fn no_directory() -> StreamError {
    StreamError::Resolution("no directory available; set a recorder host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAM: &str = "0b2c7c38-97e4-4bd3-a2b4-5d7e1c0f7a11";

    struct FakeSite {
        site: SiteConfiguration,
        hardware: Vec<HardwareInfo>,
    }

    impl ManagementService for FakeSite {
        fn login(&mut self, _: &Credentials, _: &str, _: Option<&str>) -> Result<LoginGrant> {
            unreachable!()
        }

        fn hardware(&mut self, _: &str, hardware_id: &str) -> Result<Option<HardwareInfo>> {
            Ok(self
                .hardware
                .iter()
                .find(|h| h.hardware_id == hardware_id)
                .cloned())
        }

        fn recorder_info(&mut self, _: &str, recorder_id: &str) -> Result<RecorderInfo> {
            self.site
                .recorders
                .iter()
                .find(|r| r.info.recorder_id == recorder_id)
                .map(|r| r.info.clone())
                .ok_or_else(|| StreamError::Resolution(recorder_id.to_string()))
        }

        fn site_configuration(&mut self, _: &str) -> Result<SiteConfiguration> {
            Ok(self.site.clone())
        }
    }

    fn recorder(id: &str, uri: &str, cameras: &[&str]) -> SiteRecorder {
        SiteRecorder {
            info: RecorderInfo {
                recorder_id: id.to_string(),
                name: id.to_string(),
                web_server_uri: uri.to_string(),
            },
            cameras: cameras
                .iter()
                .map(|c| CameraInfo {
                    device_id: c.to_string(),
                    hardware_id: "hw".to_string(),
                    name: c.to_string(),
                })
                .collect(),
        }
    }

    fn fake() -> FakeSite {
        FakeSite {
            site: SiteConfiguration {
                recorders: vec![
                    recorder("r1", "http://rec01:7563/", &["other"]),
                    recorder("r2", "https://rec02.corp.local:7563/", &[CAM.to_uppercase().as_str()]),
                    recorder("r3", "http://rec03:7563/", &[CAM]),
                ],
            },
            hardware: vec![HardwareInfo {
                hardware_id: "hw-1".to_string(),
                recorder_id: "r3".to_string(),
                device_ids: vec![CAM.to_string()],
            }],
        }
    }

    fn config() -> StreamConfig {
        StreamConfig {
            management_server: "vms".to_string(),
            camera_id: CAM.to_string(),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn override_skips_directory() {
        let mut cfg = config();
        cfg.recorder_host = Some("10.1.1.1".to_string());
        let loc = resolve_recorder(&mut StaticTokenService::new(Duration::ZERO), "t", &cfg).unwrap();
        assert_eq!(
            loc,
            RecorderLocation {
                host: "10.1.1.1".to_string(),
                port: 7563,
                tls: false
            }
        );
    }

    #[test]
    fn site_scan_first_match_case_insensitive() {
        let loc = resolve_recorder(&mut fake(), "t", &config()).unwrap();
        assert_eq!(loc.host, "rec02.corp.local");
        assert!(loc.tls);
    }

    #[test]
    fn site_scan_not_found() {
        let mut cfg = config();
        cfg.camera_id = "missing".to_string();
        assert!(matches!(
            resolve_recorder(&mut fake(), "t", &cfg),
            Err(StreamError::Resolution(_))
        ));
    }

    #[test]
    fn hardware_lookup_checks_membership() {
        let mut cfg = config();
        cfg.hardware_id = Some("hw-1".to_string());
        cfg.camera_id = CAM.to_uppercase();
        let loc = resolve_recorder(&mut fake(), "t", &cfg).unwrap();
        assert_eq!(loc.host, "rec03");
        assert!(!loc.tls);

        cfg.camera_id = "other".to_string();
        assert!(resolve_recorder(&mut fake(), "t", &cfg).is_err());

        cfg.hardware_id = Some("hw-unknown".to_string());
        assert!(resolve_recorder(&mut fake(), "t", &cfg).is_err());
    }

    /// Directory whose every lookup fails at the transport level.
    struct Unreachable;

    impl ManagementService for Unreachable {
        fn login(&mut self, _: &Credentials, _: &str, _: Option<&str>) -> Result<LoginGrant> {
            unreachable!()
        }

        fn hardware(&mut self, _: &str, _: &str) -> Result<Option<HardwareInfo>> {
            Err(StreamError::Io(std::io::Error::other("connection reset")))
        }

        fn recorder_info(&mut self, _: &str, _: &str) -> Result<RecorderInfo> {
            Err(StreamError::Ptz("unexpected".to_string()))
        }

        fn site_configuration(&mut self, _: &str) -> Result<SiteConfiguration> {
            Err(StreamError::Io(std::io::Error::other("connection reset")))
        }
    }

    #[test]
    fn lookup_failures_become_resolution_errors() {
        let err = resolve_recorder(&mut Unreachable, "t", &config()).unwrap_err();
        assert!(matches!(&err, StreamError::Resolution(msg) if msg.contains("connection reset")));

        let mut cfg = config();
        cfg.hardware_id = Some("hw-1".to_string());
        assert!(matches!(
            resolve_recorder(&mut Unreachable, "t", &cfg),
            Err(StreamError::Resolution(_))
        ));

        assert!(matches!(
            lookup::<()>("x", Err(StreamError::Auth("expired".to_string()))),
            Err(StreamError::Auth(_))
        ));
    }

    #[test]
    fn web_server_uri_parsing() {
        let loc = RecorderLocation::from_web_server_uri("https://rec:9000/").unwrap();
        assert_eq!(loc.address(), "rec:9000");
        assert!(loc.tls);
        let loc = RecorderLocation::from_web_server_uri("http://rec/").unwrap();
        assert_eq!(loc.port, 80);
        assert!(RecorderLocation::from_web_server_uri("not a uri").is_err());
    }

    #[test]
    fn static_token_requires_bearer() {
        let mut svc = StaticTokenService::new(Duration::from_secs(3600));
        let grant = svc
            .login(&Credentials::Bearer { token: "abc".to_string() }, "i", None)
            .unwrap();
        assert_eq!(grant.token, "abc");
        assert_eq!(grant.time_to_live, Duration::from_secs(3600));
        let basic = Credentials::Basic {
            user: "u".to_string(),
            secret: "p".to_string(),
        };
        assert!(matches!(svc.login(&basic, "i", None), Err(StreamError::Auth(_))));
    }
}
