//! LMDB-backed identity store for wireplane
//!
//! The control-plane record of who is on the overlay: named IPv6
//! subnets, per-peer addresses, public keys, names, optional contact
//! email, and creation times, all kept cross-referenced across ten
//! named sub-stores. Every public operation runs in exactly one ACID
//! transaction (read-only or read-write) and commits or aborts before
//! returning, so a crash or validation failure midway never leaves one
//! index disagreeing with another. The engine allows many concurrent
//! readers and a single writer.
//!
//! External layers (CLI prompts, peer-config rendering, the network
//! tool itself) never touch the sub-stores directly; this facade is the
//! whole surface.

mod clients;
mod metadata;
mod migrate;
mod subnets;
mod tables;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use heed3::{Env, EnvOpenOptions};
use ipnetwork::{Ipv4Network, Ipv6Network};
use tracing::{debug, info};
use wireplane_common::{ClientRecord, Error, Result, ServerConfig};

use clients::ClientRegistry;
use metadata::MetadataStore;
use subnets::SubnetIndex;
use tables::Tables;

pub use migrate::SCHEMA_VERSION;

/// Upper bound on the memory map; LMDB only consumes what is used.
const MAP_SIZE: usize = 1024 * 1024 * 1024;
const MAX_TABLES: u32 = 16;

/// The identity store facade.
///
/// Owns the environment and every table handle; all access goes through
/// the operations below, each scoped to one transaction.
pub struct IdentityStore {
    env: Env,
    metadata: MetadataStore,
    subnets: SubnetIndex,
    clients: ClientRegistry,
}

impl IdentityStore {
    /// Open or create the store at `path` (a directory). Opens all
    /// tables and brings the persisted schema up to [`SCHEMA_VERSION`]
    /// in one write transaction before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(MAX_TABLES)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let tables = Tables::open(&env, &mut wtxn)?;
        let metadata = MetadataStore::new(tables.metadata);
        let clients = ClientRegistry::new(&tables);
        let subnets = SubnetIndex::new(tables.subnets);
        migrate::run(&mut wtxn, &metadata, &clients)?;
        wtxn.commit()?;

        info!("opened identity store at {:?}", path);
        Ok(Self {
            env,
            metadata,
            subnets,
            clients,
        })
    }

    // ========================================================================
    // Server configuration
    // ========================================================================

    /// True iff the bootstrap operation has never run. Engine failures
    /// propagate rather than masquerading as either answer.
    pub fn needs_initial_configuration(&self) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        self.metadata.needs_initial_configuration(&rtxn)
    }

    /// Write the server configuration, at most once. Fails with
    /// `AlreadyExists` and writes nothing if any field is already
    /// present.
    pub fn assign_initial_configuration(&self, config: &ServerConfig) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.metadata.assign_initial_configuration(&mut wtxn, config)?;
        wtxn.commit()?;
        info!(
            interface = %config.primary_interface,
            endpoint = %config.public_endpoint,
            "assigned initial server configuration"
        );
        Ok(())
    }

    pub fn primary_interface(&self) -> Result<String> {
        let rtxn = self.env.read_txn()?;
        self.metadata.primary_interface(&rtxn)
    }

    /// The dialable endpoint, `host:port`.
    pub fn public_endpoint(&self) -> Result<String> {
        let rtxn = self.env.read_txn()?;
        let host = self.metadata.endpoint_host(&rtxn)?;
        let port = self.metadata.listen_port(&rtxn)?;
        Ok(format!("{host}:{port}"))
    }

    pub fn listen_port(&self) -> Result<u16> {
        let rtxn = self.env.read_txn()?;
        self.metadata.listen_port(&rtxn)
    }

    pub fn ipv4_scope(&self) -> Result<Ipv4Network> {
        let rtxn = self.env.read_txn()?;
        self.metadata.ipv4_scope(&rtxn)
    }

    pub fn ipv4_secure_scope(&self) -> Result<Ipv4Network> {
        let rtxn = self.env.read_txn()?;
        self.metadata.ipv4_secure_scope(&rtxn)
    }

    pub fn ipv6_scope(&self) -> Result<Ipv6Network> {
        let rtxn = self.env.read_txn()?;
        self.metadata.ipv6_scope(&rtxn)
    }

    pub fn server_public_key(&self) -> Result<String> {
        let rtxn = self.env.read_txn()?;
        self.metadata.server_public_key(&rtxn)
    }

    pub fn schema_version(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.metadata.schema_version(&rtxn)?.unwrap_or(0))
    }

    // ========================================================================
    // Subnets
    // ========================================================================

    /// Register a named subnet. Fails with `SubnetOverlaps` if the
    /// range intersects any existing subnet or contains the server's
    /// own IPv6 address, and with `AlreadyExists` if the name is bound.
    pub fn create_subnet(&self, name: &str, subnet: Ipv6Network) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let server_address = self.metadata.ipv6_scope(&wtxn)?.ip();
        self.subnets.create(&mut wtxn, name, subnet, server_address)?;
        wtxn.commit()?;
        debug!(subnet = name, range = %subnet, "created subnet");
        Ok(())
    }

    /// The full name -> range mapping.
    pub fn get_subnets(&self) -> Result<BTreeMap<String, Ipv6Network>> {
        let rtxn = self.env.read_txn()?;
        self.subnets.all(&rtxn)
    }

    /// Delete a subnet and every client in it. Returns the revoked
    /// public keys so the caller can unprogram the corresponding peers.
    pub fn revoke_subnet(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut wtxn = self.env.write_txn()?;
        if !self.subnets.delete(&mut wtxn, name)? {
            return Err(Error::NotFound {
                kind: "subnet".to_string(),
                id: name.to_string(),
            });
        }
        let members = self.clients.members_of(&wtxn, name)?;
        let mut revoked = BTreeSet::new();
        for public_key in members {
            self.clients.remove(&mut wtxn, &public_key)?;
            revoked.insert(public_key);
        }
        wtxn.commit()?;
        info!(subnet = name, clients = revoked.len(), "revoked subnet");
        Ok(revoked)
    }

    /// Read-only check used by candidate-subnet suggestion: true iff
    /// the candidate intersects no existing subnet.
    pub fn validate_non_overlapping(&self, subnet: &Ipv6Network) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        self.subnets.non_overlapping(&rtxn, subnet)
    }

    // ========================================================================
    // Clients
    // ========================================================================

    /// Validate and install a peer record; see the registry for the
    /// validation order. The record's subnet must already exist —
    /// callers are expected to have resolved it, so a miss here is an
    /// internal failure, not a user error.
    pub fn make_client(&self, record: &ClientRecord) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let subnet = self
            .subnets
            .get(&wtxn, &record.subnet)?
            .ok_or_else(|| {
                Error::Internal(format!("subnet {} is not registered", record.subnet))
            })?;
        let ipv6_scope = self.metadata.ipv6_scope(&wtxn)?;
        let ipv4_scope = self.metadata.ipv4_scope(&wtxn)?;
        self.clients.create(
            &mut wtxn,
            record,
            &subnet,
            &ipv4_scope,
            ipv6_scope.ip(),
            ipv4_scope.ip(),
        )?;
        wtxn.commit()?;
        debug!(
            client = %record.name,
            subnet = %record.subnet,
            address6 = %record.address6,
            "created client"
        );
        Ok(())
    }

    /// All records belonging to a subnet, joined across the indexes.
    pub fn get_clients(&self, subnet: &str) -> Result<Vec<ClientRecord>> {
        let rtxn = self.env.read_txn()?;
        self.clients.in_subnet(&rtxn, subnet)
    }

    /// Remove one peer and all of its index entries.
    pub fn revoke_client(&self, public_key: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.clients.remove(&mut wtxn, public_key)?;
        wtxn.commit()?;
        debug!(client = public_key, "revoked client");
        Ok(())
    }

    /// True if the address is assigned to a peer or is the server's
    /// own. Drives the caller's propose-check-retry allocation loop;
    /// `make_client` remains the final authority under races.
    pub fn is_address6_used(&self, address: Ipv6Addr) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        if address == self.metadata.ipv6_scope(&rtxn)?.ip() {
            return Ok(true);
        }
        self.clients.is_address6_assigned(&rtxn, address)
    }

    /// IPv4 counterpart of [`Self::is_address6_used`].
    pub fn is_address4_used(&self, address: Ipv4Addr) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        if address == self.metadata.ipv4_scope(&rtxn)?.ip() {
            return Ok(true);
        }
        self.clients.is_address4_assigned(&rtxn, address)
    }
}
