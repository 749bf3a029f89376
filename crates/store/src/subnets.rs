//! Named IPv6 subnet index.
//!
//! One `Str -> Str` table mapping subnet name to the canonical masked
//! CIDR text. Creation scans every existing range: ranges never overlap
//! and never contain the server's own IPv6 address.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use heed3::types::Str;
use heed3::{Database, PutFlags, RoTxn, RwTxn};
use ipnetwork::Ipv6Network;
use wireplane_common::{net, Error, Result};

pub(crate) struct SubnetIndex {
    table: Database<Str, Str>,
}

impl SubnetIndex {
    pub(crate) fn new(table: Database<Str, Str>) -> Self {
        Self { table }
    }

    pub(crate) fn get(&self, rtxn: &RoTxn<'_>, name: &str) -> Result<Option<Ipv6Network>> {
        match self.table.get(rtxn, name)? {
            None => Ok(None),
            Some(raw) => Ok(Some(parse_stored(name, raw)?)),
        }
    }

    /// Insert a subnet after checking every existing range for overlap
    /// and the candidate for the server's own address. The candidate is
    /// stored masked.
    pub(crate) fn create(
        &self,
        wtxn: &mut RwTxn<'_>,
        name: &str,
        subnet: Ipv6Network,
        server_address: Ipv6Addr,
    ) -> Result<()> {
        let candidate = net::masked_v6(&subnet);
        for entry in self.table.iter(wtxn)? {
            let (existing_name, raw) = entry?;
            let existing = parse_stored(existing_name, raw)?;
            if net::overlaps_v6(&existing, &candidate) {
                return Err(Error::SubnetOverlaps(candidate));
            }
        }
        if candidate.contains(server_address) {
            return Err(Error::SubnetOverlaps(candidate));
        }
        match self.table.put_with_flags(
            wtxn,
            PutFlags::NO_OVERWRITE,
            name,
            &candidate.to_string(),
        ) {
            Ok(()) => Ok(()),
            Err(heed3::Error::Mdb(heed3::MdbError::KeyExist)) => Err(Error::AlreadyExists {
                kind: "subnet".to_string(),
                id: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn all(&self, rtxn: &RoTxn<'_>) -> Result<BTreeMap<String, Ipv6Network>> {
        let mut subnets = BTreeMap::new();
        for entry in self.table.iter(rtxn)? {
            let (name, raw) = entry?;
            subnets.insert(name.to_string(), parse_stored(name, raw)?);
        }
        Ok(subnets)
    }

    /// Remove a subnet entry. Returns false if the name was not bound;
    /// the cascade through the client registry is driven by the facade.
    pub(crate) fn delete(&self, wtxn: &mut RwTxn<'_>, name: &str) -> Result<bool> {
        Ok(self.table.delete(wtxn, name)?)
    }

    /// Read-only overlap probe for candidate-subnet suggestion. Never
    /// mutates.
    pub(crate) fn non_overlapping(&self, rtxn: &RoTxn<'_>, candidate: &Ipv6Network) -> Result<bool> {
        for entry in self.table.iter(rtxn)? {
            let (name, raw) = entry?;
            if net::overlaps_v6(&parse_stored(name, raw)?, candidate) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn parse_stored(name: &str, raw: &str) -> Result<Ipv6Network> {
    raw.parse().map_err(|_| {
        Error::Internal(format!("stored range {raw:?} for subnet {name} does not parse as CIDR"))
    })
}
