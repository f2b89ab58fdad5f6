//! Device identity types shared by the probe builders and the parser.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::packet::DeviceResponse;

/// 4-byte device identifier embedded in every discovery response,
/// unique per physical device. Rendered as 8 lowercase hex characters
/// (e.g. `08f83588`), which is also the accepted textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId([u8; 4]);

impl DeviceId {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// True for the two reserved values that never belong to a real device:
    /// `00000000` (uninitialized) and `ffffffff` (broadcast filler echoed
    /// back by some firmware).
    pub fn is_filler(&self) -> bool {
        self.0 == [0x00; 4] || self.0 == [0xFF; 4]
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Error parsing a textual device id.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("device id must be exactly 8 hex characters")]
pub struct ParseDeviceIdError;

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| ParseDeviceIdError)?;
        let bytes: [u8; 4] = raw.try_into().map_err(|_| ParseDeviceIdError)?;
        Ok(Self(bytes))
    }
}

/// 4-byte device-type code from offset 4 of a response. Model-specific;
/// not interpreted beyond display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceType(u32);

impl DeviceType {
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// A response that parsed cleanly but fails a local validity rule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The device-id field holds one of the reserved filler values.
    #[error("device id {0} is a filler value, not a real device")]
    FillerDeviceId(DeviceId),
}

/// The externally visible result of discovery: one record per responding
/// address. Carries the full raw datagram so callers can reach fields this
/// crate does not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Address the response arrived from.
    pub addr: IpAddr,
    /// Source UDP port (devices answer from 54321).
    pub port: u16,
    pub device_type: DeviceType,
    pub device_id: DeviceId,
    /// Complete raw response bytes, undecoded trailer included.
    pub raw: Vec<u8>,
}

impl From<DeviceResponse> for DeviceRecord {
    fn from(resp: DeviceResponse) -> Self {
        Self {
            addr: resp.source.ip(),
            port: resp.source.port(),
            device_type: resp.device_type,
            device_id: resp.device_id,
            raw: resp.raw,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
