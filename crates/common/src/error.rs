//! Error types for wireplane

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::Ipv6Network;
use thiserror::Error;

/// Result type alias using the wireplane Error
pub type Result<T> = std::result::Result<T, Error>;

/// Wireplane error types
///
/// Domain-validation failures (`AddressNotInSubnet` through
/// `SubnetOverlaps`) are recoverable: the caller corrects its input or
/// regenerates a candidate and retries. `Internal` means a stored
/// invariant was violated or a persisted value failed to decode; it is
/// never recoverable by retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage engine error: {0}")]
    Storage(#[from] heed3::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("address {address} is not inside subnet {subnet}")]
    AddressNotInSubnet { address: Ipv6Addr, subnet: String },

    #[error("address {0} is outside the usable IPv4 range")]
    AddressNotUsable(Ipv4Addr),

    #[error("address {0} is already assigned")]
    AddressAlreadyAssigned(IpAddr),

    #[error("client name {name} already exists in subnet {subnet}")]
    NameExistsInSubnet { name: String, subnet: String },

    #[error("subnet {0} overlaps an existing subnet or the server address")]
    SubnetOverlaps(Ipv6Network),

    #[error("invalid network: {0}")]
    InvalidNetwork(#[from] ipnetwork::IpNetworkError),

    #[error("internal store inconsistency: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the caller is expected to handle by fixing its
    /// input or picking a new candidate; false for `Internal` and
    /// engine-level failures.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Storage(_) | Error::Internal(_))
    }
}
