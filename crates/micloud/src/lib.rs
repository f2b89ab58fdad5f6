//! # micloud
//!
//! Blocking client for the Xiaomi cloud account and device API.
//!
//! Talking to the cloud is a two-phase affair:
//!
//! 1. **Login** ([`CloudClient::login`]): a three-request exchange with
//!    the account service that turns a username and password into a
//!    [`LoginSession`] holding the user id, the `ssecurity` signing
//!    secret, and a service token.
//! 2. **Signed API calls** ([`CloudClient::list_devices`]): every request
//!    to the device API carries a fresh nonce and an HMAC-SHA256
//!    signature derived from `ssecurity`. The [`sign`] module implements
//!    that scheme and nothing else, so it can be tested against fixed
//!    vectors without any network.
//!
//! The device list is the payoff: each entry carries the device token the
//! local LAN protocol needs to talk to that device directly.
//!
//! # Example
//!
//! ```no_run
//! use micloud::{CloudClient, CloudConfig};
//!
//! # fn main() -> Result<(), micloud::CloudError> {
//! let config = CloudConfig::new("user@example.com", "hunter2");
//! let mut client = CloudClient::new(config)?;
//! client.login()?;
//! for device in client.list_devices()? {
//!     println!("{} ({}) token={:?}", device.name, device.model, device.token);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod device;
pub mod sign;

pub use client::{AuthStep, CloudClient, CloudConfig, CloudError, LoginSession};
pub use device::DeviceInfo;
pub use sign::{sign_request, signed_nonce, Nonce, SignError, SignedRequest};
