//! The account login flow and signed device API calls.
//!
//! Login is a fixed three-request dance with the account service:
//!
//! 1. `GET /pass/serviceLogin` fetches the per-session login parameters
//!    (`_sign`, `callback`, `qs`).
//! 2. `POST /pass/serviceLoginAuth2` submits the username and the MD5 of
//!    the password together with those parameters. Success yields the
//!    `ssecurity` signing secret (in the `extension-pragma` response
//!    header), the `userId` cookie, and a one-shot `location` URL.
//! 3. `GET <location>` redeems the URL; the response cookies carry the
//!    `serviceToken` that authenticates device API calls.
//!
//! All three use the stock user agent and identity cookies of a real
//! Mi Home install; the account service rejects clients it does not
//! recognize. After login, [`CloudClient::list_devices`] issues a signed
//! request (see [`crate::sign`]) to the device API.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use reqwest::blocking::{Client, Response};
use reqwest::header;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::DeviceInfo;
use crate::sign::{sign_request, Nonce, SignError, SignedRequest};

// ── Constants ───────────────────────────────────────────────────────────────

/// Production account service endpoint.
pub const ACCOUNT_BASE_URL: &str = "https://account.xiaomi.com";

/// Production device API endpoint. Accounts registered outside mainland
/// China live on country-prefixed hosts such as
/// `https://de.api.io.mi.com/app`.
pub const API_BASE_URL: &str = "https://api.io.mi.com/app";

/// Service id the login is scoped to; `xiaomiio` covers the device API.
const SERVICE_ID: &str = "xiaomiio";

/// User agent of the iOS Mi Home release this client presents itself as.
/// The account service gates the JSON login flow on a recognized client.
const USER_AGENT: &str =
    "APP/com.xiaomi.mihome APPV/6.0.103 iosPassportSDK/3.9.0 iOS/14.4 miHSTS";

/// Passport SDK version reported alongside the device id cookie.
const SDK_VERSION: &str = "3.9";

/// API access key matching the same iOS release.
const ACCESS_KEY: &str = "IOS00026747c5acafc2";

/// Anti-hijacking prefix the account service puts before JSON bodies.
const JSON_GUARD_PREFIX: &str = "&&&START&&&";

/// Path of the device list endpoint below the API base.
const DEVICE_LIST_URI: &str = "/home/device_list";

// ── Errors ──────────────────────────────────────────────────────────────────

/// Stage of the cloud conversation an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// Building the HTTP client.
    ClientSetup,
    /// Fetching login parameters from the account service.
    LoginInit,
    /// Submitting credentials.
    LoginAuth,
    /// Redeeming the login redirect for a service token.
    TokenExchange,
    /// Calling the device list API.
    DeviceList,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStep::ClientSetup => "client setup",
            AuthStep::LoginInit => "login init",
            AuthStep::LoginAuth => "credential auth",
            AuthStep::TokenExchange => "service token exchange",
            AuthStep::DeviceList => "device list",
        };
        f.write_str(name)
    }
}

/// Errors from the cloud client.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The HTTP request itself failed: connect, TLS, or a non-2xx status.
    #[error("{step} request failed: {source}")]
    Transport {
        step: AuthStep,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered, but the payload was not what the flow
    /// expects (bad JSON, a missing field, an absent header or cookie).
    #[error("{step} response malformed: {detail}")]
    Protocol { step: AuthStep, detail: String },

    /// The account service rejected the credentials.
    #[error("login rejected (code {code}): {description}")]
    Auth { code: i64, description: String },

    /// The device API accepted the request but reported an error.
    #[error("device api error (code {code}): {message}")]
    Api { code: i64, message: String },

    /// A signed API call was attempted before a successful login.
    #[error("not logged in; call login() before signed API calls")]
    NotAuthenticated,

    /// Request signing failed.
    #[error(transparent)]
    Sign(#[from] SignError),
}

// ── Configuration and session ───────────────────────────────────────────────

/// Account credentials and endpoints for a [`CloudClient`].
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Account username: email, phone number, or numeric Mi id.
    pub username: String,
    /// Account password, hashed before it leaves the client.
    pub password: String,
    /// Client identity sent as the `PassportDeviceId` cookie. `None`
    /// generates a fresh UUID; supply a stable value to look like one
    /// install across runs.
    pub device_id: Option<String>,
    /// Account service base URL.
    pub account_base_url: String,
    /// Device API base URL, including any country prefix.
    pub api_base_url: String,
}

impl CloudConfig {
    /// Configuration against the production endpoints.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            device_id: None,
            account_base_url: ACCOUNT_BASE_URL.to_owned(),
            api_base_url: API_BASE_URL.to_owned(),
        }
    }
}

/// Credentials produced by a completed login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    /// Numeric account id, as the API's `userId` cookie expects it.
    pub user_id: String,
    /// Base64 signing secret for API requests.
    pub ssecurity: String,
    /// Bearer token for the device API.
    pub service_token: String,
}

// ── Client ──────────────────────────────────────────────────────────────────

/// Blocking cloud client. Construct once, [`login`](Self::login) once,
/// then issue signed API calls for as long as the session stays valid.
#[derive(Debug)]
pub struct CloudClient {
    config: CloudConfig,
    http: Client,
    device_id: String,
    session: Option<LoginSession>,
}

/// Login parameters handed out by the serviceLogin endpoint.
struct LoginInit {
    sign: String,
    callback: String,
    qs: String,
}

/// What a successful credential submission yields.
struct AuthOutcome {
    user_id: Option<String>,
    ssecurity: String,
    location: String,
}

impl CloudClient {
    /// Builds a client from the given configuration.
    pub fn new(config: CloudConfig) -> Result<Self, CloudError> {
        let device_id = config
            .device_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string().to_uppercase());
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| CloudError::Transport {
                step: AuthStep::ClientSetup,
                source,
            })?;
        Ok(Self {
            config,
            http,
            device_id,
            session: None,
        })
    }

    /// The `PassportDeviceId` this client identifies itself with.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The current session, if a login has succeeded.
    pub fn session(&self) -> Option<&LoginSession> {
        self.session.as_ref()
    }

    /// Runs the full login flow and stores the resulting session.
    ///
    /// Safe to call again to refresh an expired session; the old one is
    /// replaced only after the new flow completes.
    pub fn login(&mut self) -> Result<&LoginSession, CloudError> {
        info!("logging in to the account service");
        let init = self.login_init()?;
        let auth = self.login_auth(&init)?;
        let (service_token, late_user_id) = self.fetch_service_token(&auth.location)?;

        // The token exchange may refresh userId; the newest value wins.
        let user_id = late_user_id.or(auth.user_id).ok_or(CloudError::Protocol {
            step: AuthStep::LoginAuth,
            detail: "no userId in cookies or body".to_owned(),
        })?;

        let session = LoginSession {
            user_id,
            ssecurity: auth.ssecurity,
            service_token,
        };
        info!("login complete for user {}", session.user_id);
        Ok(self.session.insert(session))
    }

    /// Signs one API request against the logged-in session.
    ///
    /// `uri_path` is the endpoint path below the API base and `data` the
    /// exact JSON string the request will carry.
    pub fn sign(&self, uri_path: &str, data: &str) -> Result<SignedRequest, CloudError> {
        let session = self.session.as_ref().ok_or(CloudError::NotAuthenticated)?;
        let nonce = Nonce::generate();
        Ok(sign_request(uri_path, &session.ssecurity, &nonce, data)?)
    }

    /// Fetches every device registered to the account.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, CloudError> {
        let step = AuthStep::DeviceList;
        let session = self.session.as_ref().ok_or(CloudError::NotAuthenticated)?;

        let request_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        let data = json!({
            "getVirtualModel": true,
            "getHuamiDevices": 0,
            "accessKey": ACCESS_KEY,
            "requestId": request_id.to_string(),
        })
        .to_string();
        let signed = self.sign(DEVICE_LIST_URI, &data)?;

        debug!("requesting device list");
        let url = format!("{}{}", self.config.api_base_url, DEVICE_LIST_URI);
        let response = self
            .http
            .get(&url)
            .header("x-xiaomi-protocal-flag-cli", "PROTOCAL-HTTP2")
            .header(
                header::COOKIE,
                format!(
                    "userId={}; serviceToken={}; PassportDeviceId={}",
                    session.user_id, session.service_token, self.device_id
                ),
            )
            .query(&[
                ("_nonce", signed.nonce.as_str()),
                ("data", data.as_str()),
                ("signature", signed.signature.as_str()),
            ])
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| CloudError::Transport { step, source })?;

        let body = response
            .text()
            .map_err(|source| CloudError::Transport { step, source })?;
        let payload: Value = serde_json::from_str(&body).map_err(|e| CloudError::Protocol {
            step,
            detail: format!("invalid json: {e}"),
        })?;

        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_owned();
            return Err(CloudError::Api { code, message });
        }

        let list = payload
            .pointer("/result/list")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let devices: Vec<DeviceInfo> =
            serde_json::from_value(list).map_err(|e| CloudError::Protocol {
                step,
                detail: format!("unreadable device entries: {e}"),
            })?;

        info!("device list returned {} device(s)", devices.len());
        Ok(devices)
    }

    // ── Login steps ─────────────────────────────────────────────────────

    fn login_init(&self) -> Result<LoginInit, CloudError> {
        let step = AuthStep::LoginInit;
        let url = format!(
            "{}/pass/serviceLogin?sid={}&_json=true",
            self.config.account_base_url, SERVICE_ID
        );
        debug!("fetching login parameters");
        let response = self
            .http
            .get(&url)
            .header(header::COOKIE, self.identity_cookies())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| CloudError::Transport { step, source })?;
        let body = response
            .text()
            .map_err(|source| CloudError::Transport { step, source })?;
        let payload = parse_guarded_json(&body, step)?;

        Ok(LoginInit {
            sign: required_str(&payload, "_sign", step)?,
            callback: required_str(&payload, "callback", step)?,
            qs: required_str(&payload, "qs", step)?,
        })
    }

    fn login_auth(&self, init: &LoginInit) -> Result<AuthOutcome, CloudError> {
        let step = AuthStep::LoginAuth;
        let url = format!(
            "{}/pass/serviceLoginAuth2",
            self.config.account_base_url
        );
        let hash = password_hash(&self.config.password);
        let form = [
            ("_json", "true"),
            ("callback", init.callback.as_str()),
            ("sid", SERVICE_ID),
            ("qs", init.qs.as_str()),
            ("_sign", init.sign.as_str()),
            ("user", self.config.username.as_str()),
            ("hash", hash.as_str()),
        ];

        debug!("submitting credentials for {}", self.config.username);
        let response = self
            .http
            .post(&url)
            .header(header::COOKIE, self.identity_cookies())
            .form(&form)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| CloudError::Transport { step, source })?;

        // ssecurity rides in a response header and userId in a response
        // cookie; both must be read before the body consumes the response.
        let ssecurity = extension_pragma_ssecurity(&response);
        let cookie_user_id = response_cookie(&response, "userId");

        let body = response
            .text()
            .map_err(|source| CloudError::Transport { step, source })?;
        let payload = parse_guarded_json(&body, step)?;

        match payload.get("code").and_then(Value::as_i64) {
            Some(0) => {}
            Some(code) => {
                let description = payload
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("no description")
                    .to_owned();
                return Err(CloudError::Auth { code, description });
            }
            None => {
                return Err(CloudError::Protocol {
                    step,
                    detail: "auth response carries no result code".to_owned(),
                });
            }
        }

        let user_id = cookie_user_id.or_else(|| payload.get("userId").map(value_to_string));
        let ssecurity = ssecurity.ok_or_else(|| CloudError::Protocol {
            step,
            detail: "no ssecurity in extension-pragma header".to_owned(),
        })?;
        let location = required_str(&payload, "location", step)?;

        Ok(AuthOutcome {
            user_id,
            ssecurity,
            location,
        })
    }

    /// Redeems the one-shot location URL; the service token (and
    /// sometimes a refreshed userId) arrive as response cookies.
    fn fetch_service_token(
        &self,
        location: &str,
    ) -> Result<(String, Option<String>), CloudError> {
        let step = AuthStep::TokenExchange;
        debug!("exchanging login redirect for a service token");
        let response = self
            .http
            .get(location)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| CloudError::Transport { step, source })?;

        let user_id = response_cookie(&response, "userId");
        let service_token =
            response_cookie(&response, "serviceToken").ok_or_else(|| CloudError::Protocol {
                step,
                detail: "no serviceToken cookie in response".to_owned(),
            })?;
        Ok((service_token, user_id))
    }

    /// Identity cookies every account service request carries.
    fn identity_cookies(&self) -> String {
        format!(
            "PassportDeviceId={}; sdkVersion={}",
            self.device_id, SDK_VERSION
        )
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Uppercase hex MD5, the password digest the account service expects.
fn password_hash(password: &str) -> String {
    hex::encode_upper(Md5::digest(password.as_bytes()))
}

/// Parses an account service body, tolerating the anti-hijacking prefix.
fn parse_guarded_json(body: &str, step: AuthStep) -> Result<Value, CloudError> {
    let trimmed = body.trim_start();
    let text = trimmed.strip_prefix(JSON_GUARD_PREFIX).unwrap_or(trimmed);
    serde_json::from_str(text).map_err(|e| CloudError::Protocol {
        step,
        detail: format!("invalid json: {e}"),
    })
}

/// Pulls a required string field out of a JSON payload.
fn required_str(payload: &Value, field: &'static str, step: AuthStep) -> Result<String, CloudError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| CloudError::Protocol {
            step,
            detail: format!("missing field `{field}`"),
        })
}

/// The auth response smuggles ssecurity in an `extension-pragma` header
/// holding a small JSON object.
fn extension_pragma_ssecurity(response: &Response) -> Option<String> {
    let raw = response.headers().get("extension-pragma")?.to_str().ok()?;
    let payload: Value = serde_json::from_str(raw).ok()?;
    Some(payload.get("ssecurity")?.as_str()?.to_owned())
}

/// Reads one named cookie from a response's `Set-Cookie` headers.
fn response_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .cookies()
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}

/// Renders a JSON scalar the way the API expects it in a cookie: numbers
/// bare, strings unquoted.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> CloudClient {
        CloudClient::new(CloudConfig::new("user@example.com", "password")).unwrap()
    }

    #[test]
    fn test_password_hash_is_uppercase_md5() {
        assert_eq!(
            password_hash("password"),
            "5F4DCC3B5AA765D61D8327DEB882CF99"
        );
        assert_eq!(password_hash("hunter2"), "2AB96390C7DBE3439DE74D0C9B0B1767");
        assert_eq!(
            password_hash("correct horse battery staple"),
            "9CC2AE8A1BA7A93DA39B46FC1019C481"
        );
    }

    #[test]
    fn test_config_defaults_to_production_endpoints() {
        // Act
        let config = CloudConfig::new("user", "pass");

        // Assert
        assert_eq!(config.account_base_url, "https://account.xiaomi.com");
        assert_eq!(config.api_base_url, "https://api.io.mi.com/app");
        assert!(config.device_id.is_none());
    }

    #[test]
    fn test_device_id_defaults_to_uppercase_uuid() {
        // Act
        let client = offline_client();

        // Assert
        assert_eq!(client.device_id().len(), 36);
        assert_eq!(client.device_id(), client.device_id().to_uppercase());
        assert!(Uuid::parse_str(client.device_id()).is_ok());
    }

    #[test]
    fn test_explicit_device_id_is_kept() {
        // Arrange
        let mut config = CloudConfig::new("user", "pass");
        config.device_id = Some("3C861A5C-3E85-4293-A54B-DDDD65531D8F".to_owned());

        // Act
        let client = CloudClient::new(config).unwrap();

        // Assert
        assert_eq!(client.device_id(), "3C861A5C-3E85-4293-A54B-DDDD65531D8F");
    }

    #[test]
    fn test_sign_requires_a_session() {
        // Arrange
        let client = offline_client();

        // Act
        let result = client.sign("/home/device_list", "{}");

        // Assert
        assert!(matches!(result, Err(CloudError::NotAuthenticated)));
        assert!(client.session().is_none());
    }

    #[test]
    fn test_list_devices_requires_a_session() {
        let client = offline_client();
        assert!(matches!(
            client.list_devices(),
            Err(CloudError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_guard_prefix_is_stripped_before_parsing() {
        // Act
        let payload =
            parse_guarded_json("&&&START&&&{\"code\": 0}", AuthStep::LoginInit).unwrap();

        // Assert
        assert_eq!(payload["code"], 0);
    }

    #[test]
    fn test_unguarded_json_still_parses() {
        let payload = parse_guarded_json("{\"code\": 0}", AuthStep::LoginInit).unwrap();
        assert_eq!(payload["code"], 0);
    }

    #[test]
    fn test_non_json_body_is_a_protocol_error() {
        // Act
        let result = parse_guarded_json("<html>sign in</html>", AuthStep::LoginInit);

        // Assert
        assert!(matches!(
            result,
            Err(CloudError::Protocol {
                step: AuthStep::LoginInit,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_field_is_reported_by_name() {
        // Arrange
        let payload: Value = serde_json::from_str("{}").unwrap();

        // Act
        let error = required_str(&payload, "_sign", AuthStep::LoginInit).unwrap_err();

        // Assert
        assert!(error.to_string().contains("_sign"));
    }

    #[test]
    fn test_numeric_user_id_renders_bare() {
        // Arrange
        let payload: Value = serde_json::from_str(r#"{"userId": 314159}"#).unwrap();

        // Act + Assert
        assert_eq!(value_to_string(&payload["userId"]), "314159");
        assert_eq!(
            value_to_string(&Value::String("314159".to_owned())),
            "314159"
        );
    }

    #[test]
    fn test_auth_error_display_carries_code_and_description() {
        let error = CloudError::Auth {
            code: 70016,
            description: "invalid user name or password".to_owned(),
        };
        assert_eq!(
            error.to_string(),
            "login rejected (code 70016): invalid user name or password"
        );
    }
}
