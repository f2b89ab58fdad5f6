//! Request signing for the device API.
//!
//! Every call to the device API authenticates itself with three query
//! parameters derived from the `ssecurity` secret obtained at login:
//!
//! ```text
//! nonce     = base64( 8 random bytes || minutes-since-epoch as u32 BE )
//! snonce    = base64( SHA-256( base64d(ssecurity) || base64d(nonce) ) )
//! message   = "<uri>&<snonce>&<nonce>&data=<payload>"
//! signature = base64( HMAC-SHA256( key = base64d(snonce), message ) )
//! ```
//!
//! The request carries `_nonce`, `data` and `signature`; the signed nonce
//! never leaves the client. Embedding the clock in the nonce is what lets
//! the server reject stale or replayed requests, which is also why a
//! signature cannot be precomputed long in advance.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while signing a request.
#[derive(Debug, Error)]
pub enum SignError {
    /// The `ssecurity` secret from login was not valid base64.
    #[error("ssecurity is not valid base64: {0}")]
    BadSsecurity(#[source] base64::DecodeError),
}

// ── Nonce ───────────────────────────────────────────────────────────────────

/// A client nonce: 8 random bytes followed by the current time in whole
/// minutes. The server uses the embedded timestamp to bound a request's
/// validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    bytes: [u8; 12],
}

impl Nonce {
    /// Generates a fresh nonce from OS randomness and the current time.
    pub fn generate() -> Self {
        let mut random = [0u8; 8];
        OsRng.fill_bytes(&mut random);
        let minutes = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| (elapsed.as_secs() / 60) as u32)
            .unwrap_or(0);
        Self::from_parts(random, minutes)
    }

    /// Builds a nonce from explicit parts. Signing is deterministic given
    /// a fixed nonce, so this is the entry point for reference vectors.
    pub fn from_parts(random: [u8; 8], minutes: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&random);
        bytes[8..].copy_from_slice(&minutes.to_be_bytes());
        Self { bytes }
    }

    /// The raw 12-byte form.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// The base64 form sent on the wire as `_nonce`.
    pub fn encoded(&self) -> String {
        BASE64.encode(self.bytes)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

// ── Signing ─────────────────────────────────────────────────────────────────

/// The query parameters that authenticate one API call.
///
/// Only `nonce` and `signature` are sent; `signed_nonce` is the derived
/// key material, exposed so callers can log or cache it if they need to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Base64 nonce, sent as the `_nonce` query parameter.
    pub nonce: String,
    /// Base64 signed nonce derived from `ssecurity` and the nonce.
    pub signed_nonce: String,
    /// Base64 HMAC-SHA256 signature, sent as the `signature` parameter.
    pub signature: String,
}

/// Derives the signed nonce for one request.
pub fn signed_nonce(ssecurity: &str, nonce: &Nonce) -> Result<String, SignError> {
    Ok(BASE64.encode(signed_nonce_bytes(ssecurity, nonce)?))
}

fn signed_nonce_bytes(ssecurity: &str, nonce: &Nonce) -> Result<[u8; 32], SignError> {
    let secret = BASE64.decode(ssecurity).map_err(SignError::BadSsecurity)?;
    let mut hasher = Sha256::new();
    hasher.update(&secret);
    hasher.update(nonce.as_bytes());
    Ok(hasher.finalize().into())
}

/// Signs one API request.
///
/// `uri_path` is the path below the API base (for the device list,
/// `/home/device_list`) and `data` is the exact JSON string the request
/// will carry; the signature covers both, so the caller must send the
/// same bytes it signed.
pub fn sign_request(
    uri_path: &str,
    ssecurity: &str,
    nonce: &Nonce,
    data: &str,
) -> Result<SignedRequest, SignError> {
    let key = signed_nonce_bytes(ssecurity, nonce)?;
    let signed_nonce = BASE64.encode(key);
    let nonce_text = nonce.encoded();

    let message = format!("{uri_path}&{signed_nonce}&{nonce_text}&data={data}");
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(message.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Ok(SignedRequest {
        nonce: nonce_text,
        signed_nonce,
        signature,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
