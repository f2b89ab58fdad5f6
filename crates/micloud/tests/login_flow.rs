//! End-to-end login and device list tests against a local mock of the
//! account service and device API.
//!
//! Every request the client makes is matched strictly (headers, cookies,
//! form fields, query parameters), so these tests pin the wire behavior:
//! the guarded-JSON bodies, the MD5 password hash, the identity cookies,
//! and the signed query string on API calls.

use micloud::{AuthStep, CloudClient, CloudConfig, CloudError};
use mockito::{Matcher, Mock, Server};

const USER_AGENT: &str =
    "APP/com.xiaomi.mihome APPV/6.0.103 iosPassportSDK/3.9.0 iOS/14.4 miHSTS";
const DEVICE_ID: &str = "TEST-DEVICE-ID";
const IDENTITY_COOKIES: &str = "PassportDeviceId=TEST-DEVICE-ID; sdkVersion=3.9";
const SSECURITY: &str = "MDEyMzQ1Njc4OWFiY2RlZg==";

// ── Fixtures ────────────────────────────────────────────────────────────────

fn client_for(server: &Server) -> CloudClient {
    let mut config = CloudConfig::new("user@example.com", "password");
    config.device_id = Some(DEVICE_ID.to_owned());
    config.account_base_url = server.url();
    config.api_base_url = server.url();
    CloudClient::new(config).unwrap()
}

/// Mounts a happy-path login: serviceLogin parameters, credential check,
/// and the service token exchange. Returns the mocks so tests can assert
/// each endpoint was actually hit.
fn mount_login_mocks(server: &mut Server) -> Vec<Mock> {
    let base = server.url();

    let service_login = server
        .mock("GET", "/pass/serviceLogin")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("sid".into(), "xiaomiio".into()),
            Matcher::UrlEncoded("_json".into(), "true".into()),
        ]))
        .match_header("cookie", IDENTITY_COOKIES)
        .with_body(
            r#"&&&START&&&{"code": 70016, "_sign": "signed:abc", "callback": "https://sts.example/sts", "qs": "%3Fsid%3Dxiaomiio%26_json%3Dtrue"}"#,
        )
        .create();

    let auth = server
        .mock("POST", "/pass/serviceLoginAuth2")
        .match_header("user-agent", USER_AGENT)
        .match_header("cookie", IDENTITY_COOKIES)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("_json".into(), "true".into()),
            Matcher::UrlEncoded("sid".into(), "xiaomiio".into()),
            Matcher::UrlEncoded("_sign".into(), "signed:abc".into()),
            Matcher::UrlEncoded("user".into(), "user@example.com".into()),
            // MD5("password"), uppercased; the password itself never
            // appears on the wire.
            Matcher::UrlEncoded("hash".into(), "5F4DCC3B5AA765D61D8327DEB882CF99".into()),
        ]))
        .with_header(
            "extension-pragma",
            r#"{"ssecurity":"MDEyMzQ1Njc4OWFiY2RlZg==","nonce":8555627612279104}"#,
        )
        .with_header("set-cookie", "userId=314159; Path=/")
        .with_body(format!(
            r#"&&&START&&&{{"code": 0, "location": "{base}/sts", "userId": 314159}}"#
        ))
        .create();

    let token_exchange = server
        .mock("GET", "/sts")
        .with_header(
            "set-cookie",
            "serviceToken=SERVICE-TOKEN-123; Path=/; HttpOnly",
        )
        .with_body("ok")
        .create();

    vec![service_login, auth, token_exchange]
}

// ── Login ───────────────────────────────────────────────────────────────────

#[test]
fn test_login_produces_a_complete_session() {
    // Arrange
    let mut server = Server::new();
    let mocks = mount_login_mocks(&mut server);
    let mut client = client_for(&server);

    // Act
    let session = client.login().unwrap().clone();

    // Assert
    assert_eq!(session.user_id, "314159");
    assert_eq!(session.ssecurity, SSECURITY);
    assert_eq!(session.service_token, "SERVICE-TOKEN-123");
    assert_eq!(client.session(), Some(&session));
    for mock in mocks {
        mock.assert();
    }
}

#[test]
fn test_rejected_credentials_surface_code_and_description() {
    // Arrange
    let mut server = Server::new();
    server
        .mock("GET", "/pass/serviceLogin")
        .match_query(Matcher::Any)
        .with_body(
            r#"&&&START&&&{"_sign": "signed:abc", "callback": "https://sts.example/sts", "qs": "q"}"#,
        )
        .create();
    server
        .mock("POST", "/pass/serviceLoginAuth2")
        .with_body(r#"&&&START&&&{"code": 70016, "description": "Invalid login or password"}"#)
        .create();
    let mut client = client_for(&server);

    // Act
    let error = client.login().unwrap_err();

    // Assert
    match error {
        CloudError::Auth { code, description } => {
            assert_eq!(code, 70016);
            assert!(description.contains("Invalid login"));
        }
        other => panic!("expected an auth rejection, got {other:?}"),
    }
    assert!(client.session().is_none());
}

#[test]
fn test_missing_sign_parameter_is_a_protocol_error() {
    // Arrange: a serviceLogin response with no _sign field.
    let mut server = Server::new();
    server
        .mock("GET", "/pass/serviceLogin")
        .match_query(Matcher::Any)
        .with_body(r#"&&&START&&&{"callback": "https://sts.example/sts", "qs": "q"}"#)
        .create();
    let mut client = client_for(&server);

    // Act
    let error = client.login().unwrap_err();

    // Assert
    assert!(matches!(
        error,
        CloudError::Protocol {
            step: AuthStep::LoginInit,
            ..
        }
    ));
    assert!(error.to_string().contains("_sign"));
}

#[test]
fn test_missing_service_token_cookie_is_a_protocol_error() {
    // Arrange: token exchange answers 200 but sets no cookie.
    let mut server = Server::new();
    let base = server.url();
    server
        .mock("GET", "/pass/serviceLogin")
        .match_query(Matcher::Any)
        .with_body(
            r#"&&&START&&&{"_sign": "signed:abc", "callback": "https://sts.example/sts", "qs": "q"}"#,
        )
        .create();
    server
        .mock("POST", "/pass/serviceLoginAuth2")
        .with_header("extension-pragma", r#"{"ssecurity":"MDEyMzQ1Njc4OWFiY2RlZg=="}"#)
        .with_header("set-cookie", "userId=314159; Path=/")
        .with_body(format!(r#"&&&START&&&{{"code": 0, "location": "{base}/sts"}}"#))
        .create();
    server.mock("GET", "/sts").with_body("ok").create();
    let mut client = client_for(&server);

    // Act
    let error = client.login().unwrap_err();

    // Assert
    assert!(matches!(
        error,
        CloudError::Protocol {
            step: AuthStep::TokenExchange,
            ..
        }
    ));
}

// ── Device list ─────────────────────────────────────────────────────────────

#[test]
fn test_device_list_sends_signed_query_and_parses_devices() {
    // Arrange
    let mut server = Server::new();
    mount_login_mocks(&mut server);
    let device_list = server
        .mock("GET", "/home/device_list")
        .match_header("x-xiaomi-protocal-flag-cli", "PROTOCAL-HTTP2")
        .match_header(
            "cookie",
            "userId=314159; serviceToken=SERVICE-TOKEN-123; PassportDeviceId=TEST-DEVICE-ID",
        )
        .match_query(Matcher::AllOf(vec![
            Matcher::Regex("_nonce=".into()),
            Matcher::Regex("signature=".into()),
            Matcher::Regex("getVirtualModel".into()),
            Matcher::Regex("IOS00026747c5acafc2".into()),
        ]))
        .with_body(
            r#"{"code": 0, "result": {"list": [
                {"did": "287453996", "name": "Living room speaker",
                 "model": "xiaomi.wifispeaker.lx06",
                 "token": "93b1c6ee7f2e4ab1a05e9f3c12d48a7b",
                 "localip": "192.168.1.45", "isOnline": true},
                {"did": "98765", "name": "Vacuum", "model": "roborock.vacuum.s5"}
            ]}}"#,
        )
        .create();
    let mut client = client_for(&server);
    client.login().unwrap();

    // Act
    let devices = client.list_devices().unwrap();

    // Assert
    device_list.assert();
    assert_eq!(devices.len(), 2);
    let speakers: Vec<_> = devices.iter().filter(|d| d.is_wifi_speaker()).collect();
    assert_eq!(speakers.len(), 1);
    assert_eq!(speakers[0].name, "Living room speaker");
    assert_eq!(
        speakers[0].token.as_deref(),
        Some("93b1c6ee7f2e4ab1a05e9f3c12d48a7b")
    );
}

#[test]
fn test_device_list_api_rejection_surfaces_code_and_message() {
    // Arrange
    let mut server = Server::new();
    mount_login_mocks(&mut server);
    server
        .mock("GET", "/home/device_list")
        .match_query(Matcher::Any)
        .with_body(r#"{"code": -8, "message": "signature check failed"}"#)
        .create();
    let mut client = client_for(&server);
    client.login().unwrap();

    // Act
    let error = client.list_devices().unwrap_err();

    // Assert
    match error {
        CloudError::Api { code, message } => {
            assert_eq!(code, -8);
            assert!(message.contains("signature"));
        }
        other => panic!("expected an api error, got {other:?}"),
    }
}

#[test]
fn test_device_list_http_failure_is_a_transport_error() {
    // Arrange
    let mut server = Server::new();
    mount_login_mocks(&mut server);
    server
        .mock("GET", "/home/device_list")
        .match_query(Matcher::Any)
        .with_status(500)
        .create();
    let mut client = client_for(&server);
    client.login().unwrap();

    // Act
    let error = client.list_devices().unwrap_err();

    // Assert
    assert!(matches!(
        error,
        CloudError::Transport {
            step: AuthStep::DeviceList,
            ..
        }
    ));
}

#[test]
fn test_device_list_with_no_result_is_empty() {
    // Arrange: some deployments omit `result` entirely for empty homes.
    let mut server = Server::new();
    mount_login_mocks(&mut server);
    server
        .mock("GET", "/home/device_list")
        .match_query(Matcher::Any)
        .with_body(r#"{"code": 0}"#)
        .create();
    let mut client = client_for(&server);
    client.login().unwrap();

    // Act
    let devices = client.list_devices().unwrap();

    // Assert
    assert!(devices.is_empty());
}
