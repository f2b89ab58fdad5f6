//! Builders and parser for the fixed 32-byte discovery packets.
//!
//! Layout (all multi-byte integers big-endian):
//! ```text
//! offset  0  [magic:2]        always 0x2131
//! offset  2  [length:2]       declared packet length, 0x0020
//! offset  4  [device_type:4]  model code; 0xFFFFFFFF in probes
//! offset  8  [device_id:4]    unique device identifier
//! offset 12  [stamp:4]        uptime-style counter
//! offset 16  [checksum:16]    device-specific trailer, not decoded
//! ```

use std::net::SocketAddr;

use thiserror::Error;

use crate::device::{DeviceId, DeviceType, ValidationError};

/// Magic constant at offset 0 of every packet.
pub const MAGIC: u16 = 0x2131;

/// Fixed packet size; also the value devices declare in the length field.
pub const PACKET_SIZE: usize = 32;

/// UDP port devices listen on for discovery probes.
pub const DEFAULT_PORT: u16 = 54321;

/// Type code carried by a targeted handshake probe.
const HANDSHAKE_TYPE: u32 = 0xFFFF_FFFF;

/// Type code carried by an info-request probe (and echoed in info replies).
const INFO_REQUEST_TYPE: u32 = 0x0000_0002;

/// Stamp value for the initial handshake.
const HANDSHAKE_STAMP: u32 = 0x0000_0001;

/// Errors from parsing an inbound datagram. During a discovery session
/// these are logged and dropped per-datagram, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram is shorter than one full packet.
    #[error("datagram too short: need at least {needed} bytes, got {available}")]
    TooShort { needed: usize, available: usize },

    /// The first two bytes are not the protocol magic.
    #[error("bad magic 0x{0:04X}, expected 0x2131")]
    BadMagic(u16),
}

// ── Probe builders ────────────────────────────────────────────────────────────

/// Returns the canonical broadcast probe: magic + length header followed by
/// 28 bytes of `0xFF`. Pure, no side effects.
///
/// # Examples
///
/// ```rust
/// use miio_proto::packet::{build_probe, PACKET_SIZE};
///
/// let probe = build_probe();
/// assert_eq!(probe.len(), PACKET_SIZE);
/// assert_eq!(&probe[..4], &[0x21, 0x31, 0x00, 0x20]);
/// ```
pub fn build_probe() -> [u8; PACKET_SIZE] {
    let mut buf = [0xFF; PACKET_SIZE];
    write_header(&mut buf);
    buf
}

/// Returns the targeted handshake probe for one known device: type
/// `0xFFFFFFFF`, the device id, stamp 1, trailer `0xFF`.
pub fn build_handshake(device_id: DeviceId) -> [u8; PACKET_SIZE] {
    let mut buf = [0xFF; PACKET_SIZE];
    write_header(&mut buf);
    buf[4..8].copy_from_slice(&HANDSHAKE_TYPE.to_be_bytes());
    buf[8..12].copy_from_slice(device_id.as_bytes());
    buf[12..16].copy_from_slice(&HANDSHAKE_STAMP.to_be_bytes());
    buf
}

/// Returns the info-request probe: type `0x00000002`, the device id,
/// stamp 1, trailer zeroed.
pub fn build_info_request(device_id: DeviceId) -> [u8; PACKET_SIZE] {
    let mut buf = [0x00; PACKET_SIZE];
    write_header(&mut buf);
    buf[4..8].copy_from_slice(&INFO_REQUEST_TYPE.to_be_bytes());
    buf[8..12].copy_from_slice(device_id.as_bytes());
    buf[12..16].copy_from_slice(&HANDSHAKE_STAMP.to_be_bytes());
    buf
}

fn write_header(buf: &mut [u8; PACKET_SIZE]) {
    buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
    buf[2..4].copy_from_slice(&(PACKET_SIZE as u16).to_be_bytes());
}

// ── Response parsing ──────────────────────────────────────────────────────────

/// A discovery response decoded from one inbound datagram. Constructed
/// transiently per datagram, classified valid/invalid, then either turned
/// into a [`crate::device::DeviceRecord`] or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    /// Address and port the datagram arrived from.
    pub source: SocketAddr,
    /// Length the device declared in its header (normally 0x0020).
    pub declared_len: u16,
    pub device_type: DeviceType,
    pub device_id: DeviceId,
    /// Uptime-style counter; used by the command protocol for replay
    /// protection, recorded here as-is.
    pub stamp: u32,
    /// The complete raw datagram, including any bytes past offset 32.
    pub raw: Vec<u8>,
}

/// Decodes a datagram into a [`DeviceResponse`].
///
/// Fails if fewer than 32 bytes are present or the magic field does not
/// equal `0x2131`. Anything else decodes; validity of the device id is a
/// separate check ([`DeviceResponse::is_valid`]) so callers can observe
/// filler responses at debug level before discarding them.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short datagrams and foreign magic values.
///
/// # Examples
///
/// ```rust
/// use miio_proto::packet::parse_response;
///
/// let source: std::net::SocketAddr = "192.168.1.45:54321".parse().unwrap();
/// let mut bytes = vec![0x21, 0x31, 0x00, 0x20];
/// bytes.extend([0x00, 0x00, 0x00, 0x02]); // device type
/// bytes.extend([0x08, 0xf8, 0x35, 0x88]); // device id
/// bytes.extend([0x00, 0x00, 0x00, 0x01]); // stamp
/// bytes.extend([0xA5; 16]); // trailer
///
/// let resp = parse_response(&bytes, source).unwrap();
/// assert_eq!(resp.device_id.to_string(), "08f83588");
/// assert!(resp.is_valid());
/// ```
pub fn parse_response(bytes: &[u8], source: SocketAddr) -> Result<DeviceResponse, ProtocolError> {
    if bytes.len() < PACKET_SIZE {
        return Err(ProtocolError::TooShort {
            needed: PACKET_SIZE,
            available: bytes.len(),
        });
    }

    let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let declared_len = u16::from_be_bytes([bytes[2], bytes[3]]);
    let device_type = DeviceType::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let device_id = DeviceId::from_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let stamp = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    Ok(DeviceResponse {
        source,
        declared_len,
        device_type,
        device_id,
        stamp,
        raw: bytes.to_vec(),
    })
}

impl DeviceResponse {
    /// The 16-byte checksum/token trailer (offsets 16..32).
    pub fn checksum(&self) -> &[u8] {
        &self.raw[16..PACKET_SIZE]
    }

    /// Checks the local validity rules: the device id must not be one of
    /// the reserved filler values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id.is_filler() {
            return Err(ValidationError::FillerDeviceId(self.device_id));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
