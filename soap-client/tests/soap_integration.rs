//! SOAP and GENA requests against a mock device.

use mockito::Matcher;
use soap_client::{SoapClient, SoapError};

const SERVICE: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

#[test]
fn test_invoke_returns_output_arguments() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/RenderingControl/Control")
        .match_header("soapaction", format!("\"{}#GetVolume\"", SERVICE).as_str())
        .match_body(Matcher::Regex("<Channel>Master</Channel>".to_string()))
        .with_status(200)
        .with_header("content-type", "text/xml; charset=\"utf-8\"")
        .with_body(format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:GetVolumeResponse xmlns:u="{SERVICE}"><CurrentVolume>17</CurrentVolume></u:GetVolumeResponse></s:Body></s:Envelope>"#
        ))
        .create();

    let client = SoapClient::default();
    let output = client
        .invoke(
            &format!("{}/RenderingControl/Control", server.url()),
            SERVICE,
            "GetVolume",
            &[
                ("InstanceID".to_string(), "0".to_string()),
                ("Channel".to_string(), "Master".to_string()),
            ],
        )
        .unwrap();

    assert_eq!(output, vec![("CurrentVolume".to_string(), "17".to_string())]);
    mock.assert();
}

#[test]
fn test_invoke_fault() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("POST", "/control")
        .with_status(500)
        .with_body(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0"><errorCode>402</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#,
        )
        .create();

    let result = SoapClient::default().invoke(&format!("{}/control", server.url()), SERVICE, "SetVolume", &[]);
    assert!(matches!(result, Err(SoapError::Fault(402))));
}

#[test]
fn test_invoke_plain_server_error() {
    let mut server = mockito::Server::new();
    let _mock = server.mock("POST", "/control").with_status(500).with_body("oops").create();

    let result = SoapClient::default().invoke(&format!("{}/control", server.url()), SERVICE, "Play", &[]);
    assert!(matches!(result, Err(SoapError::Status(500))));
}

#[test]
fn test_subscribe_renew_unsubscribe() {
    let mut server = mockito::Server::new();
    let callback = "http://192.168.1.10:49152/";
    let subscribe = server
        .mock("SUBSCRIBE", "/event")
        .match_header("nt", "upnp:event")
        .match_header("callback", format!("<{callback}>").as_str())
        .match_header("timeout", "Second-300")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-1800")
        .create();
    let renew = server
        .mock("SUBSCRIBE", "/event")
        .match_header("sid", "uuid:sub-1")
        .with_status(200)
        .with_header("SID", "uuid:sub-1")
        .with_header("TIMEOUT", "Second-600")
        .create();
    let unsubscribe = server
        .mock("UNSUBSCRIBE", "/event")
        .match_header("sid", "uuid:sub-1")
        .with_status(200)
        .create();

    let client = SoapClient::new(true);
    let event_url = format!("{}/event", server.url());

    let response = client.subscribe(&event_url, callback, 300).unwrap();
    assert_eq!(response.sid, "uuid:sub-1");
    assert_eq!(response.timeout_seconds, 1800);

    let renewed = client.renew_subscription(&event_url, "uuid:sub-1", 300).unwrap();
    assert_eq!(renewed.timeout_seconds, 600);

    client.unsubscribe(&event_url, "uuid:sub-1").unwrap();

    subscribe.assert();
    renew.assert();
    unsubscribe.assert();
}

#[test]
fn test_subscribe_without_sid_fails() {
    let mut server = mockito::Server::new();
    let _mock = server.mock("SUBSCRIBE", "/event").with_status(200).create();

    let result = SoapClient::default().subscribe(&format!("{}/event", server.url()), "http://127.0.0.1:1/", 300);
    assert!(matches!(result, Err(SoapError::MissingHeader("SID"))));
}

#[test]
fn test_renew_rejected() {
    let mut server = mockito::Server::new();
    let _mock = server.mock("SUBSCRIBE", "/event").with_status(412).create();

    let result = SoapClient::default().renew_subscription(&format!("{}/event", server.url()), "uuid:gone", 300);
    assert!(matches!(result, Err(SoapError::Status(412))));
}
