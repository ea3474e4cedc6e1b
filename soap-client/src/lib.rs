//! SOAP and GENA client for UPnP device communication
//!
//! This crate provides the outgoing half of UPnP control: invoking service
//! actions with SOAP over HTTP `POST`, and managing event subscriptions with
//! the GENA `SUBSCRIBE`/`UNSUBSCRIBE` methods. Requests go through the
//! workspace's blocking [`HttpClient`].

mod error;

pub use error::{Result, SoapError};

use upnp_http::{names, HttpClient, HttpRequest, HttpResponse};
use xmltree::{Element, XMLNode};

const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

/// Granted subscription timeouts are capped to one day.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u64,
}

/// A minimal SOAP client for UPnP device communication
pub struct SoapClient {
    http: HttpClient,
}

impl SoapClient {
    /// Create a new SOAP client
    pub fn new(keep_alive: bool) -> Self {
        Self::with_http_client(HttpClient::new(keep_alive))
    }

    pub fn with_http_client(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }

    /// Invoke `action` on the service at `control_url`.
    ///
    /// Returns the output arguments in document order. A SOAP fault becomes
    /// [`SoapError::Fault`] carrying the UPnP `errorCode`.
    pub fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let body = envelope(service_type, action, arguments);
        let mut request = HttpRequest::new("POST", "/");
        request.set_header(names::CONTENT_TYPE, CONTENT_TYPE_XML);
        request.set_header(names::SOAPACTION, format!("\"{}#{}\"", service_type, action));
        request.set_body(&body, true);

        tracing::debug!("Invoking {}#{} at {}", service_type, action, control_url);
        let response = self.http.post(control_url, request)?;
        let status = response.status();
        if status != 200 && status != 500 {
            return Err(SoapError::Status(status));
        }
        let xml = match Element::parse(response.body()) {
            Ok(xml) => xml,
            // A 500 without a SOAP body is a plain server error
            Err(_) if status == 500 => return Err(SoapError::Status(status)),
            Err(e) => return Err(SoapError::Parse(e.to_string())),
        };
        let element = self.extract_response(&xml, action)?;
        Ok(response_arguments(&element))
    }

    /// Subscribe to events of the service at `event_url`.
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u64,
    ) -> Result<SubscriptionResponse> {
        let mut request = HttpRequest::new("SUBSCRIBE", "/");
        request.set_header(names::NT, "upnp:event");
        request.set_header(names::CALLBACK, format!("<{}>", callback_url));
        request.set_header(names::TIMEOUT, format!("Second-{}", timeout_seconds));
        request.set_header(names::CONTENT_LENGTH, "0");

        let response = self.send_checked(event_url, request)?;
        let sid = response
            .header(names::SID)
            .map(str::trim)
            .filter(|sid| !sid.is_empty())
            .ok_or(SoapError::MissingHeader(names::SID))?
            .to_string();
        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: parse_timeout(response.header(names::TIMEOUT), timeout_seconds),
        })
    }

    /// Renew an existing subscription.
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout_seconds: u64,
    ) -> Result<SubscriptionResponse> {
        let mut request = HttpRequest::new("SUBSCRIBE", "/");
        request.set_header(names::SID, sid);
        request.set_header(names::TIMEOUT, format!("Second-{}", timeout_seconds));
        request.set_header(names::CONTENT_LENGTH, "0");

        let response = self.send_checked(event_url, request)?;
        if let Some(granted) = response.header(names::SID).map(str::trim) {
            if granted != sid {
                tracing::warn!("Renewal of {} answered with SID {}, keeping ours", sid, granted);
            }
        }
        Ok(SubscriptionResponse {
            sid: sid.to_string(),
            timeout_seconds: parse_timeout(response.header(names::TIMEOUT), timeout_seconds),
        })
    }

    /// Cancel a subscription.
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        let mut request = HttpRequest::new("UNSUBSCRIBE", "/");
        request.set_header(names::SID, sid);
        request.set_header(names::CONTENT_LENGTH, "0");
        self.send_checked(event_url, request)?;
        Ok(())
    }

    fn send_checked(&self, url: &str, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method().to_string();
        let response = self.http.post(url, request)?;
        if response.status() != 200 {
            tracing::debug!("{} {} failed: HTTP {}", method, url, response.status());
            return Err(SoapError::Status(response.status()));
        }
        Ok(response)
    }

    fn extract_response(&self, xml: &Element, action: &str) -> Result<Element> {
        let body = xml
            .get_child("Body")
            .ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

        // Check for SOAP fault first
        if let Some(fault) = body.get_child("Fault") {
            let error_code = fault
                .get_child("detail")
                .and_then(|d| d.get_child("UPnPError"))
                .and_then(|e| e.get_child("errorCode"))
                .and_then(|c| c.get_text())
                .and_then(|t| t.trim().parse::<u16>().ok())
                .unwrap_or(500);
            return Err(SoapError::Fault(error_code));
        }

        let response_name = format!("{}Response", action);
        body.get_child(response_name.as_str())
            .cloned()
            .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Build the SOAP envelope for an action call, escaping argument values.
pub fn envelope(service_type: &str, action: &str, arguments: &[(String, String)]) -> String {
    let mut args = String::new();
    for (name, value) in arguments {
        args.push_str(&format!(
            "<{name}>{value}</{name}>",
            name = name,
            value = quick_xml::escape::escape(value.as_str())
        ));
    }
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
            "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">",
            "<s:Body><u:{action} xmlns:u=\"{service_type}\">{args}</u:{action}></s:Body>",
            "</s:Envelope>"
        ),
        action = action,
        service_type = service_type,
        args = args
    )
}

/// Child elements of an action response as `(name, text)` pairs.
pub fn response_arguments(element: &Element) -> Vec<(String, String)> {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|child| {
            let text = child.get_text().map(|t| t.into_owned()).unwrap_or_default();
            (child.name.clone(), text)
        })
        .collect()
}

/// Seconds from a `TIMEOUT: Second-<n>` header.
///
/// `infinite`, a missing header or a malformed value fall back to `requested`.
/// Values above [`MAX_TIMEOUT_SECONDS`] are clamped.
pub fn parse_timeout(value: Option<&str>, requested: u64) -> u64 {
    value
        .map(str::trim)
        .and_then(|v| {
            v.get(..7)
                .filter(|prefix| prefix.eq_ignore_ascii_case("Second-"))
                .and_then(|_| v[7..].trim().parse::<u64>().ok())
        })
        .filter(|seconds| *seconds > 0)
        .unwrap_or(requested)
        .min(MAX_TIMEOUT_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_soap_client_creation() {
        let client = SoapClient::new(true);
        assert!(client.http_client().is_keep_alive());
        assert!(!SoapClient::default().http_client().is_keep_alive());
    }

    #[test]
    fn test_extract_response_with_valid_response() {
        let client = SoapClient::default();

        let xml_str = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
                        <CurrentVolume>42</CurrentVolume>
                        <Muted>0</Muted>
                    </u:GetVolumeResponse>
                </s:Body>
            </s:Envelope>
        "#;

        let xml = Element::parse(xml_str.as_bytes()).unwrap();
        let response = client.extract_response(&xml, "GetVolume").unwrap();

        assert_eq!(response.name, "GetVolumeResponse");
        assert_eq!(
            response_arguments(&response),
            vec![
                ("CurrentVolume".to_string(), "42".to_string()),
                ("Muted".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn test_extract_response_with_soap_fault() {
        let client = SoapClient::default();

        let xml_str = r#"
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
                <s:Body>
                    <s:Fault>
                        <faultcode>s:Client</faultcode>
                        <faultstring>UPnPError</faultstring>
                        <detail>
                            <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
                                <errorCode>401</errorCode>
                                <errorDescription>Invalid Action</errorDescription>
                            </UPnPError>
                        </detail>
                    </s:Fault>
                </s:Body>
            </s:Envelope>
        "#;

        let xml = Element::parse(xml_str.as_bytes()).unwrap();
        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Fault(code) => assert_eq!(code, 401),
            other => panic!("Expected SoapError::Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_response_missing_body() {
        let client = SoapClient::default();
        let xml = Element::parse(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"></s:Envelope>"#.as_bytes(),
        )
        .unwrap();

        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Parse(msg) => assert!(msg.contains("Missing SOAP Body")),
            other => panic!("Expected SoapError::Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_response_missing_action_response() {
        let client = SoapClient::default();
        let xml = Element::parse(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body></s:Body></s:Envelope>"#
                .as_bytes(),
        )
        .unwrap();

        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Parse(msg) => assert!(msg.contains("Missing PlayResponse element")),
            other => panic!("Expected SoapError::Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_soap_fault_with_default_error_code() {
        let client = SoapClient::default();
        let xml = Element::parse(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode></s:Fault></s:Body></s:Envelope>"#
                .as_bytes(),
        )
        .unwrap();

        match client.extract_response(&xml, "Play").unwrap_err() {
            SoapError::Fault(code) => assert_eq!(code, 500),
            other => panic!("Expected SoapError::Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_escapes_arguments() {
        let body = envelope(
            "urn:schemas-upnp-org:service:AVTransport:1",
            "SetAVTransportURI",
            &[
                ("InstanceID".to_string(), "0".to_string()),
                ("CurrentURI".to_string(), "http://x/a?b=1&c=<2>".to_string()),
            ],
        );

        assert!(body.contains(r#"<u:SetAVTransportURI xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">"#));
        assert!(body.contains("<InstanceID>0</InstanceID>"));
        assert!(body.contains("<CurrentURI>http://x/a?b=1&amp;c=&lt;2&gt;</CurrentURI>"));
        assert!(Element::parse(body.as_bytes()).is_ok());
    }

    #[rstest]
    #[case(Some("Second-1800"), 300, 1800)]
    #[case(Some("second-60"), 300, 60)]
    #[case(Some("infinite"), 300, 300)]
    #[case(Some("Second-abc"), 300, 300)]
    #[case(Some("Second-0"), 300, 300)]
    #[case(None, 300, 300)]
    #[case(Some("Second-86401"), 300, MAX_TIMEOUT_SECONDS)]
    #[case(Some("Second-18446744073709551615"), 300, MAX_TIMEOUT_SECONDS)]
    #[case(Some("infinite"), u64::MAX, MAX_TIMEOUT_SECONDS)]
    fn test_parse_timeout(#[case] value: Option<&str>, #[case] requested: u64, #[case] expected: u64) {
        assert_eq!(parse_timeout(value, requested), expected);
    }
}
