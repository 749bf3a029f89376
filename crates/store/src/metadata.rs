//! Server-wide configuration singleton.
//!
//! One `Str -> Bytes` table holding the bootstrap fields. Every field is
//! written with a fail-if-exists flag inside one transaction, so
//! initialization can run at most once and never partially.

use heed3::types::{Bytes, Str};
use heed3::{Database, PutFlags, RoTxn, RwTxn};
use ipnetwork::{Ipv4Network, Ipv6Network};
use wireplane_common::{Error, Result, ServerConfig};

// Metadata keys; part of the on-disk format.
pub(crate) const META_DB_VERSION: &str = "databaseVersion";
pub(crate) const META_PRIMARY_INTERFACE: &str = "primaryWGInterface";
pub(crate) const META_ENDPOINT: &str = "server_endpoint_domain";
pub(crate) const META_LISTEN_PORT: &str = "server_public_listenPort";
pub(crate) const META_IPV4_SCOPE: &str = "server_ipv4_scope";
pub(crate) const META_IPV4_SECURE_SCOPE: &str = "server_ipv4_scope_secure";
pub(crate) const META_IPV6_SCOPE: &str = "server_ipv6_scope";
pub(crate) const META_SERVER_PUBLIC_KEY: &str = "server_public_key";

pub(crate) struct MetadataStore {
    table: Database<Str, Bytes>,
}

impl MetadataStore {
    pub(crate) fn new(table: Database<Str, Bytes>) -> Self {
        Self { table }
    }

    /// True iff the primary-interface field has never been written.
    /// Engine failures propagate; only a clean miss reads as "not yet
    /// configured".
    pub(crate) fn needs_initial_configuration(&self, rtxn: &RoTxn<'_>) -> Result<bool> {
        Ok(self.table.get(rtxn, META_PRIMARY_INTERFACE)?.is_none())
    }

    /// Write every bootstrap field, failing the whole call if any field
    /// already exists.
    pub(crate) fn assign_initial_configuration(
        &self,
        wtxn: &mut RwTxn<'_>,
        config: &ServerConfig,
    ) -> Result<()> {
        self.put_new(wtxn, META_PRIMARY_INTERFACE, config.primary_interface.as_bytes())?;
        self.put_new(wtxn, META_ENDPOINT, config.public_endpoint.as_bytes())?;
        self.put_new(wtxn, META_LISTEN_PORT, &config.listen_port.to_be_bytes())?;
        self.put_new(wtxn, META_IPV4_SCOPE, config.ipv4_scope.to_string().as_bytes())?;
        self.put_new(
            wtxn,
            META_IPV4_SECURE_SCOPE,
            config.ipv4_secure_scope.to_string().as_bytes(),
        )?;
        self.put_new(wtxn, META_IPV6_SCOPE, config.ipv6_scope.to_string().as_bytes())?;
        self.put_new(
            wtxn,
            META_SERVER_PUBLIC_KEY,
            config.server_public_key.as_bytes(),
        )?;
        Ok(())
    }

    pub(crate) fn primary_interface(&self, rtxn: &RoTxn<'_>) -> Result<String> {
        self.require_str(rtxn, META_PRIMARY_INTERFACE)
    }

    pub(crate) fn endpoint_host(&self, rtxn: &RoTxn<'_>) -> Result<String> {
        self.require_str(rtxn, META_ENDPOINT)
    }

    pub(crate) fn listen_port(&self, rtxn: &RoTxn<'_>) -> Result<u16> {
        let raw = self.require(rtxn, META_LISTEN_PORT)?;
        let bytes: [u8; 2] = raw.try_into().map_err(|_| {
            Error::Internal(format!("metadata value {META_LISTEN_PORT} has a bad width"))
        })?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub(crate) fn ipv4_scope(&self, rtxn: &RoTxn<'_>) -> Result<Ipv4Network> {
        let raw = self.require_str(rtxn, META_IPV4_SCOPE)?;
        raw.parse().map_err(|_| {
            Error::Internal(format!("stored IPv4 scope {raw:?} does not parse as CIDR"))
        })
    }

    pub(crate) fn ipv4_secure_scope(&self, rtxn: &RoTxn<'_>) -> Result<Ipv4Network> {
        let raw = self.require_str(rtxn, META_IPV4_SECURE_SCOPE)?;
        raw.parse().map_err(|_| {
            Error::Internal(format!("stored IPv4 secure scope {raw:?} does not parse as CIDR"))
        })
    }

    pub(crate) fn ipv6_scope(&self, rtxn: &RoTxn<'_>) -> Result<Ipv6Network> {
        let raw = self.require_str(rtxn, META_IPV6_SCOPE)?;
        raw.parse().map_err(|_| {
            Error::Internal(format!("stored IPv6 scope {raw:?} does not parse as CIDR"))
        })
    }

    pub(crate) fn server_public_key(&self, rtxn: &RoTxn<'_>) -> Result<String> {
        self.require_str(rtxn, META_SERVER_PUBLIC_KEY)
    }

    /// Persisted schema version; `None` means a pre-versioning store.
    pub(crate) fn schema_version(&self, rtxn: &RoTxn<'_>) -> Result<Option<u64>> {
        match self.table.get(rtxn, META_DB_VERSION)? {
            None => Ok(None),
            Some(raw) => {
                let bytes: [u8; 8] = raw.try_into().map_err(|_| {
                    Error::Internal(format!("metadata value {META_DB_VERSION} has a bad width"))
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
        }
    }

    pub(crate) fn set_schema_version(&self, wtxn: &mut RwTxn<'_>, version: u64) -> Result<()> {
        self.table
            .put(wtxn, META_DB_VERSION, &version.to_be_bytes())?;
        Ok(())
    }

    pub(crate) fn delete(&self, wtxn: &mut RwTxn<'_>, key: &str) -> Result<bool> {
        Ok(self.table.delete(wtxn, key)?)
    }

    fn put_new(&self, wtxn: &mut RwTxn<'_>, key: &str, value: &[u8]) -> Result<()> {
        match self
            .table
            .put_with_flags(wtxn, PutFlags::NO_OVERWRITE, key, value)
        {
            Ok(()) => Ok(()),
            Err(heed3::Error::Mdb(heed3::MdbError::KeyExist)) => Err(Error::AlreadyExists {
                kind: "server configuration".to_string(),
                id: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn require<'txn>(&self, rtxn: &'txn RoTxn<'_>, key: &str) -> Result<&'txn [u8]> {
        self.table.get(rtxn, key)?.ok_or_else(|| Error::NotFound {
            kind: "server configuration".to_string(),
            id: key.to_string(),
        })
    }

    fn require_str(&self, rtxn: &RoTxn<'_>, key: &str) -> Result<String> {
        let raw = self.require(rtxn, key)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| Error::Internal(format!("metadata value {key} is not valid UTF-8")))
    }
}
