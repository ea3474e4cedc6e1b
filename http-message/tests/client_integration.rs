//! HttpClient against a local mock server.

use upnp_http::{HttpClient, HttpError, HttpRequest};

#[test]
fn test_download_string() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/description.xml")
        .with_status(200)
        .with_header("content-type", "text/xml")
        .with_body("<root/>")
        .create();

    let client = HttpClient::new(false);
    let body = client
        .download_string(&format!("{}/description.xml", server.url()))
        .unwrap();

    assert_eq!(body, "<root/>");
    assert!(client.local_address().is_some());
    mock.assert();
}

#[test]
fn test_download_follows_redirect() {
    let mut server = mockito::Server::new();
    let redirect = server
        .mock("GET", "/old.xml")
        .with_status(302)
        .with_header("location", "/new.xml")
        .create();
    let target = server
        .mock("GET", "/new.xml")
        .with_status(200)
        .with_body("moved")
        .create();

    let client = HttpClient::new(true);
    let body = client
        .download_string(&format!("{}/old.xml", server.url()))
        .unwrap();

    assert_eq!(body, "moved");
    redirect.assert();
    target.assert();
}

#[test]
fn test_download_gives_up_after_two_redirects() {
    let mut server = mockito::Server::new();
    let _loop = server
        .mock("GET", "/loop.xml")
        .with_status(301)
        .with_header("location", "/loop.xml")
        .expect(3)
        .create();

    let client = HttpClient::new(false);
    let result = client.download(&format!("{}/loop.xml", server.url()));

    assert!(matches!(result, Err(HttpError::TooManyRedirects(_))));
}

#[test]
fn test_download_rejects_error_status() {
    let mut server = mockito::Server::new();
    let _missing = server.mock("GET", "/missing.xml").with_status(404).create();

    let client = HttpClient::new(false);
    let result = client.download(&format!("{}/missing.xml", server.url()));

    assert!(matches!(result, Err(HttpError::Status(404))));
}

#[test]
fn test_post_returns_any_status() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/control")
        .match_header("soapaction", "\"urn:test#Play\"")
        .with_status(500)
        .with_body("fault")
        .create();

    let mut request = HttpRequest::new("POST", "/");
    request.set_header("SOAPACTION", "\"urn:test#Play\"");
    request.set_body("<s:Envelope/>", true);

    let client = HttpClient::new(false);
    let response = client
        .post(&format!("{}/control", server.url()), request)
        .unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.body_text(), "fault");
    mock.assert();
}

#[test]
fn test_keep_alive_client_sends_sequential_requests() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/a.xml")
        .with_status(200)
        .with_body("a")
        .expect(2)
        .create();

    let client = HttpClient::new(true);
    let url = format!("{}/a.xml", server.url());
    assert_eq!(client.download_string(&url).unwrap(), "a");
    assert_eq!(client.download_string(&url).unwrap(), "a");
    mock.assert();
}
