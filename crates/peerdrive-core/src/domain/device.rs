//! Device identity and addressing

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::newtypes::DeviceId;

/// Network address of a peer device
///
/// The transport layer decides what `host` means (IP, overlay id, relay
/// handle); the sync core only compares and forwards addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of one device acting on behalf of a user
///
/// Sent in every message header so the receiver can check capabilities
/// (by username) and address the reply (by peer address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDevice {
    /// The username of the user this device belongs to
    pub username: String,
    /// The unique id of the device itself
    pub device_id: DeviceId,
    /// Where the device can be reached
    pub address: PeerAddress,
}

impl ClientDevice {
    pub fn new(username: impl Into<String>, device_id: DeviceId, address: PeerAddress) -> Self {
        Self {
            username: username.into(),
            device_id,
            address,
        }
    }
}

impl Display for ClientDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_display() {
        let addr = PeerAddress::new("10.0.0.7", 4001);
        assert_eq!(addr.to_string(), "10.0.0.7:4001");
    }

    #[test]
    fn test_client_device_display() {
        let device = ClientDevice::new("alice", DeviceId::new(), PeerAddress::new("peer-a", 9));
        assert_eq!(device.to_string(), "alice@peer-a:9");
    }
}
