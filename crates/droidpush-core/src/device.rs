//! Target device model.
//!
//! A [`Device`] pairs a validated network address with the connection state
//! last observed through the bridge. Only the connection reconciler updates
//! that state; everything else reads it.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::AddressError;

/// TCP port the bridge assumes when an address carries no port.
pub const DEFAULT_BRIDGE_PORT: u16 = 5555;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}(?::[0-9]{1,5})?$")
        .expect("address pattern is a valid regex")
});

/// A validated `ddd.ddd.ddd.ddd[:port]` device address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    raw: String,
    port: Option<u16>,
}

impl DeviceAddress {
    /// Validate and wrap an address string.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if !ADDRESS_PATTERN.is_match(input) {
            return Err(AddressError::Malformed(input.to_string()));
        }

        let (host, port) = match input.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        };

        for octet in host.split('.') {
            if octet.parse::<u8>().is_err() {
                return Err(AddressError::OctetOutOfRange {
                    address: input.to_string(),
                    octet: octet.to_string(),
                });
            }
        }

        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => {
                    return Err(AddressError::InvalidPort {
                        address: input.to_string(),
                    });
                }
                Ok(port) => Some(port),
            },
            None => None,
        };

        Ok(Self {
            raw: input.to_string(),
            port,
        })
    }

    /// The address exactly as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Host part with any port suffix removed.
    pub fn host(&self) -> &str {
        strip_port(&self.raw)
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Serial the bridge lists this device under once connected (`host:port`).
    pub fn serial(&self) -> String {
        format!(
            "{}:{}",
            self.host(),
            self.port.unwrap_or(DEFAULT_BRIDGE_PORT)
        )
    }

    /// Whether a bridge-reported address names the same host, ignoring ports.
    pub fn matches(&self, reported: &str) -> bool {
        strip_port(reported) == self.host()
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.raw)
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Strip a trailing `:port` from a bridge address.
pub fn strip_port(address: &str) -> &str {
    address.split(':').next().unwrap_or(address)
}

/// Connection state as reported by the bridge `devices` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unauthorized,
    /// Token the bridge reported that has no known meaning.
    Unknown(String),
}

impl ConnectionState {
    /// Map a raw `devices` state token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "device" => Self::Connected,
            "offline" => Self::Disconnected,
            "unauthorized" => Self::Unauthorized,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Unknown(token) => write!(f, "unknown ({token})"),
        }
    }
}

/// A device targeted by one run.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    address: DeviceAddress,
    state: ConnectionState,
}

impl Device {
    /// Create a device, rejecting malformed addresses.
    pub fn new(address: &str) -> Result<Self, AddressError> {
        Ok(Self::from_address(DeviceAddress::parse(address)?))
    }

    pub fn from_address(address: DeviceAddress) -> Self {
        Self {
            address,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Last state observed by reconciliation.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub(crate) fn record_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_ported_addresses() {
        for input in ["192.168.1.20", "10.0.0.1:5555", "0.0.0.0", "255.255.255.255:65535"] {
            assert!(DeviceAddress::parse(input).is_ok(), "{input} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in [
            "",
            "localhost",
            "192.168.1",
            "192.168.1.1.1",
            "192.168.1.1:",
            "192.168.1.1:123456",
            " 192.168.1.1",
            "192.168.1.1 ",
            "1921.168.1.1",
            "a.b.c.d",
            "192.168.1.1:port",
            "emulator-5554",
        ] {
            assert!(
                matches!(DeviceAddress::parse(input), Err(AddressError::Malformed(_))),
                "{input:?} should be malformed"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_octets_and_ports() {
        assert!(matches!(
            DeviceAddress::parse("256.1.1.1"),
            Err(AddressError::OctetOutOfRange { .. })
        ));
        assert!(matches!(
            DeviceAddress::parse("10.0.0.1:0"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            DeviceAddress::parse("10.0.0.1:70000"),
            Err(AddressError::InvalidPort { .. })
        ));
    }

    #[test]
    fn serial_defaults_to_bridge_port() {
        let bare = DeviceAddress::parse("10.0.0.7").unwrap();
        assert_eq!(bare.serial(), "10.0.0.7:5555");
        assert_eq!(bare.port(), None);

        let ported = DeviceAddress::parse("10.0.0.7:4444").unwrap();
        assert_eq!(ported.serial(), "10.0.0.7:4444");
        assert_eq!(ported.host(), "10.0.0.7");
    }

    #[test]
    fn matching_ignores_ports() {
        let address = DeviceAddress::parse("10.0.0.7").unwrap();
        assert!(address.matches("10.0.0.7:5555"));
        assert!(address.matches("10.0.0.7"));
        assert!(!address.matches("10.0.0.70:5555"));
    }

    #[test]
    fn unrecognized_token_keeps_raw_text() {
        assert_eq!(ConnectionState::from_token("device"), ConnectionState::Connected);
        assert_eq!(
            ConnectionState::from_token("offline"),
            ConnectionState::Disconnected
        );
        assert_eq!(
            ConnectionState::from_token("recovery"),
            ConnectionState::Unknown("recovery".to_string())
        );
    }

    #[test]
    fn new_device_starts_disconnected() {
        let device = Device::new("10.1.2.3:5555").unwrap();
        assert_eq!(device.state(), &ConnectionState::Disconnected);
        assert!(Device::new("not-an-ip").is_err());
    }
}
