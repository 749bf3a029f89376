//! Named sub-stores and their typed handles.
//!
//! All ten tables are opened (creating them when absent) inside the
//! single write transaction that opens the store. Keys and values use
//! fixed canonical encodings: strings are UTF-8, addresses are
//! fixed-width big-endian integers (128-bit IPv6, 32-bit IPv4), CIDR
//! networks are canonical text, timestamps are big-endian epoch seconds.

use heed3::byteorder::BE;
use heed3::types::{Bytes, Str, I64, U128, U32};
use heed3::{Database, Env, RwTxn};
use wireplane_common::Result;

// Persisted table names. These are part of the on-disk format and must
// not change without a schema migration.
pub(crate) const TABLE_METADATA: &str = "metadata";
pub(crate) const TABLE_SUBNETS: &str = "subnetName_subnetV6";
pub(crate) const TABLE_PUB_SUBNET: &str = "pub_subnetName";
pub(crate) const TABLE_PUB_NAME: &str = "pub_clientName";
pub(crate) const TABLE_PUB_IPV6: &str = "pub_clientIPv6";
pub(crate) const TABLE_IPV6_PUB: &str = "clientIPv6_pub";
pub(crate) const TABLE_PUB_IPV4: &str = "pub_clientIPv4";
pub(crate) const TABLE_IPV4_PUB: &str = "clientIPv4_pub";
pub(crate) const TABLE_PUB_EMAIL: &str = "pub_email";
pub(crate) const TABLE_PUB_CREATED: &str = "pub_createdOn";

/// Typed handles for every named sub-store.
pub(crate) struct Tables {
    /// Server-wide singleton fields, one heterogeneous value per key
    pub(crate) metadata: Database<Str, Bytes>,
    /// subnet name -> canonical CIDR text
    pub(crate) subnets: Database<Str, Str>,
    /// public key -> subnet membership
    pub(crate) pub_subnet: Database<Str, Str>,
    /// public key -> client name
    pub(crate) pub_name: Database<Str, Str>,
    /// public key -> IPv6 address (forward)
    pub(crate) pub_ipv6: Database<Str, U128<BE>>,
    /// IPv6 address -> public key (reverse)
    pub(crate) ipv6_pub: Database<U128<BE>, Str>,
    /// public key -> IPv4 address (forward, optional per client)
    pub(crate) pub_ipv4: Database<Str, U32<BE>>,
    /// IPv4 address -> public key (reverse)
    pub(crate) ipv4_pub: Database<U32<BE>, Str>,
    /// public key -> contact email (optional per client)
    pub(crate) pub_email: Database<Str, Str>,
    /// public key -> creation time, epoch seconds
    pub(crate) pub_created: Database<Str, I64<BE>>,
}

impl Tables {
    pub(crate) fn open(env: &Env, wtxn: &mut RwTxn<'_>) -> Result<Self> {
        let metadata = env
            .database_options()
            .types::<Str, Bytes>()
            .name(TABLE_METADATA)
            .create(wtxn)?;
        let subnets = env
            .database_options()
            .types::<Str, Str>()
            .name(TABLE_SUBNETS)
            .create(wtxn)?;
        let pub_subnet = env
            .database_options()
            .types::<Str, Str>()
            .name(TABLE_PUB_SUBNET)
            .create(wtxn)?;
        let pub_name = env
            .database_options()
            .types::<Str, Str>()
            .name(TABLE_PUB_NAME)
            .create(wtxn)?;
        let pub_ipv6 = env
            .database_options()
            .types::<Str, U128<BE>>()
            .name(TABLE_PUB_IPV6)
            .create(wtxn)?;
        let ipv6_pub = env
            .database_options()
            .types::<U128<BE>, Str>()
            .name(TABLE_IPV6_PUB)
            .create(wtxn)?;
        let pub_ipv4 = env
            .database_options()
            .types::<Str, U32<BE>>()
            .name(TABLE_PUB_IPV4)
            .create(wtxn)?;
        let ipv4_pub = env
            .database_options()
            .types::<U32<BE>, Str>()
            .name(TABLE_IPV4_PUB)
            .create(wtxn)?;
        let pub_email = env
            .database_options()
            .types::<Str, Str>()
            .name(TABLE_PUB_EMAIL)
            .create(wtxn)?;
        let pub_created = env
            .database_options()
            .types::<Str, I64<BE>>()
            .name(TABLE_PUB_CREATED)
            .create(wtxn)?;

        Ok(Self {
            metadata,
            subnets,
            pub_subnet,
            pub_name,
            pub_ipv6,
            ipv6_pub,
            pub_ipv4,
            ipv4_pub,
            pub_email,
            pub_created,
        })
    }
}
