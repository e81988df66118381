use std::time::Duration;

use quick_xml::escape::escape;

use crate::error::{Result, StreamError};
use crate::ptz::{CommandClient, CommandConnector, CommandEndpoint, PtzMove};
use crate::soap::{HttpAuth, SoapClient, SoapError};

const NAMESPACE: &str = "http://videoos.net/2/XProtectCSRecorderCommand";

/// SOAP client for one recorder's command service.
///
/// The underlying HTTP client pools its connection, so a burst of
/// commands shares one keep-alive socket.
pub struct SoapCommandClient {
    soap: SoapClient,
    url: String,
}

impl SoapCommandClient {
    pub fn connect(endpoint: &CommandEndpoint, timeout: Option<Duration>) -> Result<Self> {
        let soap = SoapClient::new(timeout).map_err(command_error)?;
        let url = endpoint.url();
        tracing::debug!(%url, "command service client ready");
        Ok(SoapCommandClient { soap, url })
    }

    fn call(&self, action: &str, arguments: &str) -> Result<()> {
        self.soap
            .call(
                &self.url,
                NAMESPACE,
                &format!("{NAMESPACE}/{action}"),
                action,
                arguments,
                &HttpAuth::None,
            )
            .map_err(command_error)?;
        tracing::debug!(action, "command service call succeeded");
        Ok(())
    }
}

impl CommandClient for SoapCommandClient {
    fn move_stop(&mut self, token: &str, device_id: &str) -> Result<()> {
        let args = format!(
            "<token>{}</token><deviceId>{}</deviceId>",
            escape(token),
            escape(device_id)
        );
        self.call("PTZMoveStop", &args)
    }

    fn move_start(&mut self, token: &str, device_id: &str, movement: &PtzMove) -> Result<()> {
        let args = format!(
            "<token>{}</token><deviceId>{}</deviceId>{}",
            escape(token),
            escape(device_id),
            ptz_args(movement)
        );
        self.call("PTZMoveStart", &args)
    }
}

/// Connector producing [`SoapCommandClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoapConnector;

impl CommandConnector for SoapConnector {
    fn connect(
        &self,
        endpoint: &CommandEndpoint,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn CommandClient>> {
        Ok(Box::new(SoapCommandClient::connect(endpoint, timeout)?))
    }
}

fn command_error(err: SoapError) -> StreamError {
    StreamError::Ptz(err.to_string())
}

/// `ptzArgs` element for a move, unnormalized.
fn ptz_args(movement: &PtzMove) -> String {
    let (directions, speeds) = movement.arguments();
    let mut xml = String::from("<ptzArgs><movement>");
    for (axis, value) in directions {
        xml.push_str(&format!(
            "<PTZArg><name>{axis}</name><value>{value}</value></PTZArg>"
        ));
    }
    xml.push_str("</movement><speed>");
    for (axis, value) in speeds {
        xml.push_str(&format!(
            "<PTZArg><name>{axis}</name><value>{value}</value></PTZArg>"
        ));
    }
    xml.push_str("</speed><Normalized>false</Normalized></ptzArgs>");
    xml
}
