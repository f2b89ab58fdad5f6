//! Device records returned by the cloud device list.

use serde::Deserialize;

/// One device registered to the account.
///
/// The API returns many more fields than these; only the ones the toolkit
/// acts on are kept. `token` is the prize: it is the shared secret the
/// local LAN protocol encrypts with, and the cloud is the only place to
/// read it for devices that hide it locally. Shared (non-owned) devices
/// may come back without one.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    /// Cloud device id.
    pub did: String,
    /// User-assigned display name.
    pub name: String,
    /// Model string, e.g. `xiaomi.wifispeaker.lx06`.
    pub model: String,
    /// Local-protocol token, when the account owns the device.
    #[serde(default)]
    pub token: Option<String>,
    /// LAN address last reported to the cloud.
    #[serde(default, rename = "localip")]
    pub local_ip: Option<String>,
    /// Hardware address.
    #[serde(default)]
    pub mac: Option<String>,
    /// Whether the cloud currently sees the device.
    #[serde(default, rename = "isOnline")]
    pub is_online: bool,
}

impl DeviceInfo {
    /// True for WiFi speaker models (`*.wifispeaker.*`).
    pub fn is_wifi_speaker(&self) -> bool {
        self.model.contains("wifispeaker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_record_deserializes() {
        // Arrange
        let json = r#"{
            "did": "287453996",
            "name": "Living room speaker",
            "model": "xiaomi.wifispeaker.lx06",
            "token": "93b1c6ee7f2e4ab1a05e9f3c12d48a7b",
            "localip": "192.168.1.45",
            "mac": "A4:12:42:0B:9C:01",
            "isOnline": true,
            "extra": {"ignored": "field"}
        }"#;

        // Act
        let device: DeviceInfo = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(device.did, "287453996");
        assert_eq!(device.model, "xiaomi.wifispeaker.lx06");
        assert_eq!(device.token.as_deref(), Some("93b1c6ee7f2e4ab1a05e9f3c12d48a7b"));
        assert_eq!(device.local_ip.as_deref(), Some("192.168.1.45"));
        assert!(device.is_online);
        assert!(device.is_wifi_speaker());
    }

    #[test]
    fn test_sparse_record_uses_defaults() {
        // Arrange: a shared device exposes no token, address, or presence.
        let json = r#"{"did": "1", "name": "Shared lamp", "model": "yeelink.light.lamp1"}"#;

        // Act
        let device: DeviceInfo = serde_json::from_str(json).unwrap();

        // Assert
        assert!(device.token.is_none());
        assert!(device.local_ip.is_none());
        assert!(device.mac.is_none());
        assert!(!device.is_online);
        assert!(!device.is_wifi_speaker());
    }
}
