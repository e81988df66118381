//! SOAP client for the management server's command service.
//!
//! On first use the client fetches the service description from
//! `<endpoint>?wsdl` to learn the advertised service address and the SOAP
//! actions of each operation. With
//! [`force_management_address`](StreamConfig::force_management_address) the
//! advertised host is replaced by the configured one, for servers that
//! advertise an internal name.
//!
//! Basic credentials and bearer tokens are sent as HTTP authorization
//! headers. Integrated (NTLM) authentication is not available.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::escape::escape;

use crate::config::{Credentials, StreamConfig};
use crate::directory::{
    CameraInfo, HardwareInfo, LoginGrant, ManagementService, RecorderInfo, SiteConfiguration,
    SiteRecorder,
};
use crate::error::{Result, StreamError};
use crate::protocol::XmlElement;
use crate::soap::{HttpAuth, SoapClient, SoapError};

const NAMESPACE: &str = "http://videoos.net/2/XProtectCSServerCommand";

/// Address and operation actions read from a service description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescription {
    /// `soap:address` of the first service port.
    pub address: Option<String>,
    actions: Vec<(String, String)>,
}

impl ServiceDescription {
    pub fn parse(wsdl: &str) -> Result<Self> {
        let root = XmlElement::parse(wsdl)
            .map_err(|e| StreamError::Resolution(format!("unreadable service description: {e}")))?;
        let address = root
            .find("service")
            .and_then(|s| s.find("address"))
            .and_then(|a| a.attribute("location"))
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let mut actions: Vec<(String, String)> = Vec::new();
        for binding in root.children_named("binding") {
            for op in binding.children_named("operation") {
                let name = op.attribute("name");
                let action = op.child("operation").and_then(|o| o.attribute("soapAction"));
                if let (Some(name), Some(action)) = (name, action) {
                    if !actions.iter().any(|(n, _)| n == name) {
                        actions.push((name.to_string(), action.to_string()));
                    }
                }
            }
        }
        Ok(ServiceDescription { address, actions })
    }

    /// SOAP action for `operation`, defaulting to `<namespace>/<operation>`.
    pub fn soap_action(&self, operation: &str) -> String {
        self.actions
            .iter()
            .find(|(name, _)| name == operation)
            .map(|(_, action)| action.clone())
            .unwrap_or_else(|| format!("{NAMESPACE}/{operation}"))
    }
}

struct Service {
    url: String,
    description: ServiceDescription,
}

/// [`ManagementService`] backed by the management server's SOAP API.
pub struct ServerCommandClient {
    soap: SoapClient,
    config: StreamConfig,
    endpoint: String,
    auth: HttpAuth,
    service: Option<Service>,
}

impl ServerCommandClient {
    /// Client for the endpoint matching the configured credentials.
    pub fn new(config: &StreamConfig) -> Result<Self> {
        Self::with_endpoint(config, config.management_endpoint())
    }

    /// Client for an explicit command-service endpoint.
    pub fn with_endpoint(config: &StreamConfig, endpoint: String) -> Result<Self> {
        if config.management_server.trim().is_empty() {
            return Err(StreamError::Config("management server is required".to_string()));
        }
        let soap = SoapClient::new(config.io_timeout()).map_err(management_error)?;
        Ok(ServerCommandClient {
            soap,
            config: config.clone(),
            endpoint,
            auth: HttpAuth::None,
            service: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Service address in use, once discovered.
    pub fn service_url(&self) -> Option<&str> {
        self.service.as_ref().map(|s| s.url.as_str())
    }

    fn discover(&self) -> Result<Service> {
        let wsdl = self
            .soap
            .get(&format!("{}?wsdl", self.endpoint), &self.auth)
            .map_err(management_error)?;
        let description = ServiceDescription::parse(&wsdl)?;
        let advertised = description
            .address
            .clone()
            .unwrap_or_else(|| self.endpoint.clone());
        let url = self.config.effective_service_address(&advertised)?;
        tracing::info!(
            %url,
            forced = self.config.force_management_address,
            "management service located"
        );
        Ok(Service { url, description })
    }

    fn invoke(&mut self, operation: &str, arguments: &str) -> Result<XmlElement> {
        let service = match self.service.take() {
            Some(service) => service,
            None => self.discover()?,
        };
        let reply = self.soap.call(
            &service.url,
            NAMESPACE,
            &service.description.soap_action(operation),
            operation,
            arguments,
            &self.auth,
        );
        self.service = Some(service);
        reply.map_err(management_error)
    }
}

impl ManagementService for ServerCommandClient {
    fn login(
        &mut self,
        credentials: &Credentials,
        instance_id: &str,
        current_token: Option<&str>,
    ) -> Result<LoginGrant> {
        self.auth = match credentials {
            Credentials::Basic { user, secret } => HttpAuth::Basic {
                user: user.clone(),
                secret: secret.clone(),
            },
            Credentials::Bearer { token } => HttpAuth::Bearer(token.clone()),
            Credentials::Ntlm { .. } => {
                return Err(StreamError::Auth(
                    "integrated (NTLM) authentication is not supported; use BASIC or a token"
                        .to_string(),
                ));
            }
        };
        tracing::info!(
            principal = credentials.principal().as_deref().unwrap_or("token"),
            renewal = current_token.is_some(),
            "logging in to management server"
        );

        let mut args = format!("<instanceId>{}</instanceId>", escape(instance_id));
        if let Some(token) = current_token {
            args.push_str(&format!("<currentToken>{}</currentToken>", escape(token)));
        }
        let reply = self.invoke("Login", &args)?;
        parse_login(&reply)
    }

    fn hardware(&mut self, token: &str, hardware_id: &str) -> Result<Option<HardwareInfo>> {
        let args = format!(
            "<token>{}</token><hardwareIds><guid>{}</guid></hardwareIds>",
            escape(token),
            escape(hardware_id)
        );
        let reply = self.invoke("GetConfigurationHardware", &args)?;
        let result = reply.find("GetConfigurationHardwareResult").unwrap_or(&reply);
        Ok(result.children_named("HardwareInfo").next().map(|h| HardwareInfo {
            hardware_id: h
                .child_text("HardwareId")
                .unwrap_or(hardware_id)
                .to_string(),
            recorder_id: h.child_text("RecorderId").unwrap_or_default().to_string(),
            device_ids: h
                .child("DeviceIds")
                .map(|ids| ids.children_named("guid").map(|g| g.text.clone()).collect())
                .unwrap_or_default(),
        }))
    }

    fn recorder_info(&mut self, token: &str, recorder_id: &str) -> Result<RecorderInfo> {
        let args = format!(
            "<token>{}</token><recorderId>{}</recorderId>",
            escape(token),
            escape(recorder_id)
        );
        let reply = self.invoke("QueryRecorderInfo", &args)?;
        let result = reply.find("QueryRecorderInfoResult").unwrap_or(&reply);
        parse_recorder(result)
    }

    fn site_configuration(&mut self, token: &str) -> Result<SiteConfiguration> {
        let args = format!("<token>{}</token>", escape(token));
        let reply = self.invoke("GetConfiguration", &args)?;
        let result = reply.find("GetConfigurationResult").unwrap_or(&reply);

        let mut recorders = Vec::new();
        if let Some(list) = result.child("Recorders") {
            for entry in list.children_named("RecorderInfo") {
                let info = parse_recorder(entry)?;
                let cameras = entry
                    .child("Cameras")
                    .map(|c| {
                        c.children_named("CameraInfo")
                            .map(|cam| CameraInfo {
                                device_id: cam.child_text("DeviceId").unwrap_or_default().to_string(),
                                hardware_id: cam
                                    .child_text("HardwareId")
                                    .unwrap_or_default()
                                    .to_string(),
                                name: cam.child_text("Name").unwrap_or_default().to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                recorders.push(SiteRecorder { info, cameras });
            }
        }
        tracing::debug!(recorders = recorders.len(), "site configuration received");
        Ok(SiteConfiguration { recorders })
    }
}

fn management_error(err: SoapError) -> StreamError {
    if err.is_unauthorized() {
        StreamError::Auth(err.to_string())
    } else {
        StreamError::Resolution(format!("management server: {err}"))
    }
}

fn parse_login(reply: &XmlElement) -> Result<LoginGrant> {
    let result = reply.find("LoginResult").unwrap_or(reply);
    let token = result
        .child_text("Token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StreamError::Auth("login response without token".to_string()))?;
    let registration_time = result
        .child_text("RegistrationTime")
        .and_then(parse_time)
        .ok_or_else(|| StreamError::Auth("login response without registration time".to_string()))?;
    let micros = result
        .child("TimeToLive")
        .and_then(|t| t.child_text("MicroSeconds"))
        .and_then(|m| m.trim().parse::<u64>().ok())
        .ok_or_else(|| StreamError::Auth("login response without time to live".to_string()))?;
    Ok(LoginGrant {
        token: token.to_string(),
        registration_time,
        time_to_live: Duration::from_micros(micros),
    })
}

fn parse_recorder(entry: &XmlElement) -> Result<RecorderInfo> {
    let web_server_uri = entry
        .child_text("WebServerUri")
        .filter(|u| !u.is_empty())
        .ok_or_else(|| StreamError::Resolution("recorder without web server uri".to_string()))?;
    Ok(RecorderInfo {
        recorder_id: entry.child_text("RecorderId").unwrap_or_default().to_string(),
        name: entry.child_text("Name").unwrap_or_default().to_string(),
        web_server_uri: web_server_uri.to_string(),
    })
}

/// Server timestamps come with or without an offset; bare ones are UTC.
fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}
