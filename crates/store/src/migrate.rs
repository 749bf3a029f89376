//! Schema migration engine.
//!
//! Runs once per store open, inside the same write transaction that
//! opens the tables. The persisted version (absent = 0) is stepped
//! forward one version at a time until it reaches [`SCHEMA_VERSION`].
//! Every step is idempotent: re-running it over already-migrated data
//! changes nothing, so a crash between a step and its version write is
//! safe to retry.

use chrono::Utc;
use heed3::{PutFlags, RwTxn};
use tracing::info;
use wireplane_common::{Error, Result};

use crate::clients::ClientRegistry;
use crate::metadata::{MetadataStore, META_IPV4_SCOPE};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u64 = 2;

pub(crate) fn run(
    wtxn: &mut RwTxn<'_>,
    metadata: &MetadataStore,
    clients: &ClientRegistry,
) -> Result<()> {
    loop {
        let version = metadata.schema_version(wtxn)?.unwrap_or(0);
        if version == SCHEMA_VERSION {
            return Ok(());
        }
        if version > SCHEMA_VERSION {
            return Err(Error::Internal(format!(
                "store schema version {version} is newer than this build ({SCHEMA_VERSION})"
            )));
        }
        let next = match version {
            0 => {
                drop_legacy_ipv4_scope(wtxn, metadata)?;
                1
            }
            1 => {
                backfill_created_on(wtxn, clients)?;
                2
            }
            // versions above are caught before the match
            _ => unreachable!("unhandled schema version {version}"),
        };
        metadata.set_schema_version(wtxn, next)?;
        info!(from = version, to = next, "applied schema migration");
    }
}

/// 0 -> 1: pre-versioning builds stored the IPv4 scope in an
/// incompatible form; drop it so bootstrap can rewrite it. Deleting an
/// absent key is a no-op.
fn drop_legacy_ipv4_scope(wtxn: &mut RwTxn<'_>, metadata: &MetadataStore) -> Result<()> {
    metadata.delete(wtxn, META_IPV4_SCOPE)?;
    Ok(())
}

/// 1 -> 2: give every existing client a creation-time entry. Records
/// that predate the field get the current time; the fail-if-exists
/// write keeps a retried migration from clobbering values that were
/// already backfilled.
fn backfill_created_on(wtxn: &mut RwTxn<'_>, clients: &ClientRegistry) -> Result<()> {
    let public_keys = clients
        .pub_name
        .iter(wtxn)?
        .map(|entry| entry.map(|(public_key, _)| public_key.to_string()))
        .collect::<heed3::Result<Vec<_>>>()?;
    let now = Utc::now().timestamp();
    for public_key in public_keys {
        match clients
            .pub_created
            .put_with_flags(wtxn, PutFlags::NO_OVERWRITE, &public_key, &now)
        {
            Ok(()) => {}
            Err(heed3::Error::Mdb(heed3::MdbError::KeyExist)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::Tables;
    use heed3::EnvOpenOptions;
    use tempfile::TempDir;

    fn open_env(dir: &TempDir) -> heed3::Env {
        std::fs::create_dir_all(dir.path().join("db")).unwrap();
        unsafe {
            EnvOpenOptions::new()
                .map_size(64 * 1024 * 1024)
                .max_dbs(16)
                .open(dir.path().join("db"))
                .unwrap()
        }
    }

    #[test]
    fn test_migration_is_idempotent_from_pre_versioning() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);

        // Seed a pre-version-1 layout: clients with names but no
        // creation times and no version key.
        let mut wtxn = env.write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        let metadata = MetadataStore::new(tables.metadata);
        let clients = ClientRegistry::new(&tables);
        clients.pub_name.put(&mut wtxn, "PK1=", "alice").unwrap();
        clients.pub_name.put(&mut wtxn, "PK2=", "bob").unwrap();
        wtxn.commit().unwrap();

        let mut wtxn = env.write_txn().unwrap();
        run(&mut wtxn, &metadata, &clients).unwrap();
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        assert_eq!(metadata.schema_version(&rtxn).unwrap(), Some(SCHEMA_VERSION));
        let first_pass: Vec<(String, i64)> = clients
            .pub_created
            .iter(&rtxn)
            .unwrap()
            .map(|e| e.map(|(k, v)| (k.to_string(), v)))
            .collect::<heed3::Result<_>>()
            .unwrap();
        assert_eq!(first_pass.len(), 2);
        drop(rtxn);

        // Second run must change nothing, including the backfilled
        // timestamps.
        let mut wtxn = env.write_txn().unwrap();
        run(&mut wtxn, &metadata, &clients).unwrap();
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        let second_pass: Vec<(String, i64)> = clients
            .pub_created
            .iter(&rtxn)
            .unwrap()
            .map(|e| e.map(|(k, v)| (k.to_string(), v)))
            .collect::<heed3::Result<_>>()
            .unwrap();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_backfill_preserves_existing_created_on() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);

        let mut wtxn = env.write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        let metadata = MetadataStore::new(tables.metadata);
        let clients = ClientRegistry::new(&tables);
        metadata.set_schema_version(&mut wtxn, 1).unwrap();
        clients.pub_name.put(&mut wtxn, "PK1=", "alice").unwrap();
        clients.pub_created.put(&mut wtxn, "PK1=", &12345).unwrap();
        clients.pub_name.put(&mut wtxn, "PK2=", "bob").unwrap();
        run(&mut wtxn, &metadata, &clients).unwrap();
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        assert_eq!(clients.pub_created.get(&rtxn, "PK1=").unwrap(), Some(12345));
        assert!(clients.pub_created.get(&rtxn, "PK2=").unwrap().is_some());
        assert_eq!(metadata.schema_version(&rtxn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_newer_store_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let env = open_env(&dir);

        let mut wtxn = env.write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        let metadata = MetadataStore::new(tables.metadata);
        let clients = ClientRegistry::new(&tables);
        metadata
            .set_schema_version(&mut wtxn, SCHEMA_VERSION + 1)
            .unwrap();
        let err = run(&mut wtxn, &metadata, &clients).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
