//! Multi-index client registry.
//!
//! The public key is the primary identity; six secondary tables keep
//! subnet membership, name, IPv6/IPv4 forward and reverse address
//! mappings, email, and creation time in lockstep. Every mutation here
//! runs inside the caller's single transaction, so a validation failure
//! midway leaves no index out of sync with the others.

use std::net::{Ipv4Addr, Ipv6Addr};

use heed3::byteorder::BE;
use heed3::types::{Str, I64, U128, U32};
use heed3::{Database, PutFlags, RoTxn, RwTxn};
use ipnetwork::{Ipv4Network, Ipv6Network};
use wireplane_common::{net, ClientRecord, Error, Result};

use crate::tables::{Tables, TABLE_PUB_CREATED, TABLE_PUB_IPV6, TABLE_PUB_NAME};

pub(crate) struct ClientRegistry {
    pub(crate) pub_subnet: Database<Str, Str>,
    pub(crate) pub_name: Database<Str, Str>,
    pub(crate) pub_ipv6: Database<Str, U128<BE>>,
    pub(crate) ipv6_pub: Database<U128<BE>, Str>,
    pub(crate) pub_ipv4: Database<Str, U32<BE>>,
    pub(crate) ipv4_pub: Database<U32<BE>, Str>,
    pub(crate) pub_email: Database<Str, Str>,
    pub(crate) pub_created: Database<Str, I64<BE>>,
}

impl ClientRegistry {
    pub(crate) fn new(tables: &Tables) -> Self {
        Self {
            pub_subnet: tables.pub_subnet,
            pub_name: tables.pub_name,
            pub_ipv6: tables.pub_ipv6,
            ipv6_pub: tables.ipv6_pub,
            pub_ipv4: tables.pub_ipv4,
            ipv4_pub: tables.ipv4_pub,
            pub_email: tables.pub_email,
            pub_created: tables.pub_created,
        }
    }

    /// Validate and install a client record. Validation order: address
    /// inside the subnet range, name unused within the subnet, IPv6
    /// address unassigned, then (when present) IPv4 usable and
    /// unassigned. The first failure aborts with nothing written; the
    /// uniqueness checks here are the final authority for racing
    /// allocators.
    pub(crate) fn create(
        &self,
        wtxn: &mut RwTxn<'_>,
        record: &ClientRecord,
        subnet: &Ipv6Network,
        ipv4_scope: &Ipv4Network,
        server_address6: Ipv6Addr,
        server_address4: Ipv4Addr,
    ) -> Result<()> {
        if !subnet.contains(record.address6) {
            return Err(Error::AddressNotInSubnet {
                address: record.address6,
                subnet: record.subnet.clone(),
            });
        }

        // Equal names are allowed only on different subnets.
        for entry in self.pub_name.iter(wtxn)? {
            let (public_key, name) = entry?;
            if name != record.name {
                continue;
            }
            let member_subnet = self.pub_subnet.get(wtxn, public_key)?.ok_or_else(|| {
                Error::Internal(format!(
                    "client {public_key} has a name entry but no subnet membership"
                ))
            })?;
            if member_subnet == record.subnet {
                return Err(Error::NameExistsInSubnet {
                    name: record.name.clone(),
                    subnet: record.subnet.clone(),
                });
            }
        }

        let address6 = u128::from(record.address6);
        if record.address6 == server_address6 || self.ipv6_pub.get(wtxn, &address6)?.is_some() {
            return Err(Error::AddressAlreadyAssigned(record.address6.into()));
        }

        if let Some(address4) = record.address4 {
            if !net::is_usable_v4(ipv4_scope, address4) {
                return Err(Error::AddressNotUsable(address4));
            }
            let key4 = u32::from(address4);
            if address4 == server_address4 || self.ipv4_pub.get(wtxn, &key4)?.is_some() {
                return Err(Error::AddressAlreadyAssigned(address4.into()));
            }
        }

        // Validation passed: install every index entry.
        match self.pub_subnet.put_with_flags(
            wtxn,
            PutFlags::NO_OVERWRITE,
            &record.public_key,
            &record.subnet,
        ) {
            Ok(()) => {}
            Err(heed3::Error::Mdb(heed3::MdbError::KeyExist)) => {
                return Err(Error::AlreadyExists {
                    kind: "client".to_string(),
                    id: record.public_key.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.pub_name.put(wtxn, &record.public_key, &record.name)?;
        self.pub_ipv6.put(wtxn, &record.public_key, &address6)?;
        self.ipv6_pub.put(wtxn, &address6, &record.public_key)?;
        self.pub_created
            .put(wtxn, &record.public_key, &record.created_at)?;
        if let Some(email) = &record.email {
            self.pub_email.put(wtxn, &record.public_key, email)?;
        }
        if let Some(address4) = record.address4 {
            let key4 = u32::from(address4);
            self.pub_ipv4.put(wtxn, &record.public_key, &key4)?;
            self.ipv4_pub.put(wtxn, &key4, &record.public_key)?;
        }
        Ok(())
    }

    /// All public keys that belong to a subnet.
    pub(crate) fn members_of(&self, rtxn: &RoTxn<'_>, subnet: &str) -> Result<Vec<String>> {
        let mut members = Vec::new();
        for entry in self.pub_subnet.iter(rtxn)? {
            let (public_key, member_subnet) = entry?;
            if member_subnet == subnet {
                members.push(public_key.to_string());
            }
        }
        Ok(members)
    }

    /// Join the full record set for one subnet. A required entry missing
    /// for a key present in the membership index is a broken invariant
    /// and aborts the read.
    pub(crate) fn in_subnet(&self, rtxn: &RoTxn<'_>, subnet: &str) -> Result<Vec<ClientRecord>> {
        let mut records = Vec::new();
        for entry in self.pub_subnet.iter(rtxn)? {
            let (public_key, member_subnet) = entry?;
            if member_subnet == subnet {
                records.push(self.load(rtxn, public_key, member_subnet)?);
            }
        }
        Ok(records)
    }

    fn load(&self, rtxn: &RoTxn<'_>, public_key: &str, subnet: &str) -> Result<ClientRecord> {
        let name = self
            .pub_name
            .get(rtxn, public_key)?
            .ok_or_else(|| join_miss(public_key, TABLE_PUB_NAME))?
            .to_string();
        let address6 = Ipv6Addr::from(
            self.pub_ipv6
                .get(rtxn, public_key)?
                .ok_or_else(|| join_miss(public_key, TABLE_PUB_IPV6))?,
        );
        let created_at = self
            .pub_created
            .get(rtxn, public_key)?
            .ok_or_else(|| join_miss(public_key, TABLE_PUB_CREATED))?;
        let address4 = self.pub_ipv4.get(rtxn, public_key)?.map(Ipv4Addr::from);
        let email = self.pub_email.get(rtxn, public_key)?.map(str::to_string);
        Ok(ClientRecord {
            public_key: public_key.to_string(),
            name,
            subnet: subnet.to_string(),
            address6,
            address4,
            email,
            created_at,
        })
    }

    /// Delete every index entry for one public key. Missing optional
    /// entries (email, IPv4) are fine; a missing required entry fails
    /// the whole transaction.
    pub(crate) fn remove(&self, wtxn: &mut RwTxn<'_>, public_key: &str) -> Result<()> {
        if !self.pub_subnet.delete(wtxn, public_key)? {
            return Err(not_found(public_key));
        }
        if !self.pub_name.delete(wtxn, public_key)? {
            return Err(not_found(public_key));
        }
        let address6 = self
            .pub_ipv6
            .get(wtxn, public_key)?
            .ok_or_else(|| not_found(public_key))?;
        self.pub_ipv6.delete(wtxn, public_key)?;
        if !self.ipv6_pub.delete(wtxn, &address6)? {
            return Err(not_found(public_key));
        }
        if !self.pub_created.delete(wtxn, public_key)? {
            return Err(not_found(public_key));
        }
        self.pub_email.delete(wtxn, public_key)?;
        if let Some(address4) = self.pub_ipv4.get(wtxn, public_key)? {
            self.pub_ipv4.delete(wtxn, public_key)?;
            if !self.ipv4_pub.delete(wtxn, &address4)? {
                return Err(Error::Internal(format!(
                    "IPv4 reverse entry missing for client {public_key}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn is_address6_assigned(&self, rtxn: &RoTxn<'_>, address: Ipv6Addr) -> Result<bool> {
        Ok(self.ipv6_pub.get(rtxn, &u128::from(address))?.is_some())
    }

    pub(crate) fn is_address4_assigned(&self, rtxn: &RoTxn<'_>, address: Ipv4Addr) -> Result<bool> {
        Ok(self.ipv4_pub.get(rtxn, &u32::from(address))?.is_some())
    }
}

fn join_miss(public_key: &str, table: &str) -> Error {
    Error::Internal(format!("client {public_key} has no entry in {table}"))
}

fn not_found(public_key: &str) -> Error {
    Error::NotFound {
        kind: "client".to_string(),
        id: public_key.to_string(),
    }
}
