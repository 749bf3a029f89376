//! Core types for wireplane

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

/// Server-wide configuration singleton.
///
/// Written exactly once by the bootstrap operation and immutable
/// thereafter except through schema migration. The scope networks carry
/// the server's own address in their address part (e.g. `10.20.0.1/16`
/// means the overlay is `10.20.0.0/16` and the server itself answers on
/// `10.20.0.1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Kernel interface the overlay runs on (e.g. `wg0`)
    pub primary_interface: String,
    /// Public DNS name peers dial
    pub public_endpoint: String,
    /// Public UDP listen port
    pub listen_port: u16,
    /// IPv4 overlay scope; the address part is the server's own IPv4
    pub ipv4_scope: Ipv4Network,
    /// Reserved IPv4 sub-scope excluded from random allocation
    pub ipv4_secure_scope: Ipv4Network,
    /// IPv6 overlay scope; the address part is the server's own IPv6
    pub ipv6_scope: Ipv6Network,
    /// The server's WireGuard public key
    pub server_public_key: String,
}

impl ServerConfig {
    /// The server's own IPv4 address inside the overlay
    pub fn server_address4(&self) -> Ipv4Addr {
        self.ipv4_scope.ip()
    }

    /// The server's own IPv6 address inside the overlay
    pub fn server_address6(&self) -> Ipv6Addr {
        self.ipv6_scope.ip()
    }
}

/// One peer's identity record.
///
/// The public key is the primary identity and is globally unique. The
/// name is unique only within its subnet. Email and IPv4 address are
/// optional; absence is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub public_key: String,
    pub name: String,
    /// Name of the subnet this peer belongs to
    pub subnet: String,
    pub address6: Ipv6Addr,
    #[serde(default)]
    pub address4: Option<Ipv4Addr>,
    #[serde(default)]
    pub email: Option<String>,
    /// Creation time, epoch seconds
    pub created_at: i64,
}

impl ClientRecord {
    pub fn new(
        public_key: impl Into<String>,
        name: impl Into<String>,
        subnet: impl Into<String>,
        address6: Ipv6Addr,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            name: name.into(),
            subnet: subnet.into(),
            address6,
            address4: None,
            email: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_address4(mut self, address4: Ipv4Addr) -> Self {
        self.address4 = Some(address4);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
