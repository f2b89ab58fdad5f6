//! # miio-proto
//!
//! Wire format for the miIO local-network discovery protocol spoken by
//! Xiaomi smart-home devices on UDP port 54321.
//!
//! This crate is pure data handling: it builds the fixed 32-byte probe
//! packets, parses device responses, and classifies them as valid or
//! filler. It opens no sockets and performs no I/O; the discovery engine
//! crate drives it.
//!
//! # Protocol overview (for beginners)
//!
//! Every packet in the discovery handshake is exactly 32 bytes:
//!
//! ```text
//! [magic:2][length:2][device_type:4][device_id:4][stamp:4][checksum:16]
//! ```
//!
//! A host that wants to find devices broadcasts a probe whose body is all
//! `0xFF` ("anyone out there?"). Each device answers with the same layout
//! filled in: its type code, its unique 4-byte id, an uptime-style stamp,
//! and a 16-byte trailer whose meaning is device-specific. The trailer is
//! carried through undecoded: some firmware revisions put token material
//! there, others a checksum.

pub mod device;
pub mod packet;

// Re-export the working set at the crate root so callers can write
// `miio_proto::DeviceId` instead of `miio_proto::device::DeviceId`.
pub use device::{DeviceId, DeviceRecord, DeviceType, ParseDeviceIdError, ValidationError};
pub use packet::{
    build_handshake, build_info_request, build_probe, parse_response, DeviceResponse,
    ProtocolError, DEFAULT_PORT, MAGIC, PACKET_SIZE,
};
