//! End-to-end tests for the identity store: subnet lifecycle, the
//! multi-index client registry, and the address invariants.

use std::net::{Ipv4Addr, Ipv6Addr};

use tempfile::TempDir;
use wireplane_common::{ClientRecord, Error, ServerConfig};
use wireplane_store::IdentityStore;

fn test_config() -> ServerConfig {
    ServerConfig {
        primary_interface: "wg0".to_string(),
        public_endpoint: "vpn.example.com".to_string(),
        listen_port: 51820,
        ipv4_scope: "10.20.0.1/16".parse().unwrap(),
        ipv4_secure_scope: "10.20.255.0/24".parse().unwrap(),
        ipv6_scope: "fd00:aaaa::1/64".parse().unwrap(),
        server_public_key: "SERVERKEY=".to_string(),
    }
}

fn open_configured(dir: &TempDir) -> IdentityStore {
    let store = IdentityStore::open(dir.path().join("identity.db")).unwrap();
    store.assign_initial_configuration(&test_config()).unwrap();
    store
}

fn v6(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

fn v4(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

#[test]
fn test_subnet_create_list_and_overlap() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);

    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();
    store.create_subnet("home", "fd01::/112".parse().unwrap()).unwrap();

    // an overlapping range is rejected no matter the name
    let err = store
        .create_subnet("lab", "fd00::/96".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::SubnetOverlaps(_)));

    // a duplicate name is rejected even with a fresh range
    let err = store
        .create_subnet("office", "fd02::/112".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    // a range containing the server's own address is rejected
    let err = store
        .create_subnet("bad", "fd00:aaaa::/112".parse().unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::SubnetOverlaps(_)));

    let subnets = store.get_subnets().unwrap();
    assert_eq!(subnets.len(), 2);
    assert_eq!(subnets["office"], "fd00::/112".parse().unwrap());
    assert_eq!(subnets["home"], "fd01::/112".parse().unwrap());

    // operator-entered ranges are stored masked
    store
        .create_subnet("lab", "fd03::beef/112".parse().unwrap())
        .unwrap();
    assert_eq!(store.get_subnets().unwrap()["lab"], "fd03::/112".parse().unwrap());

    assert!(store
        .validate_non_overlapping(&"fd04::/112".parse().unwrap())
        .unwrap());
    assert!(!store
        .validate_non_overlapping(&"fd00::8000/112".parse().unwrap())
        .unwrap());
}

#[test]
fn test_client_lifecycle_scenario() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);

    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();
    store.create_subnet("home", "fd01::/112".parse().unwrap()).unwrap();

    let alice = ClientRecord::new("ALICEKEY=", "alice", "office", v6("fd00::1"));
    store.make_client(&alice).unwrap();

    // same address, same subnet: exactly one of the two calls wins
    let bob = ClientRecord::new("BOBKEY=", "bob", "office", v6("fd00::1"));
    let err = store.make_client(&bob).unwrap_err();
    assert!(matches!(err, Error::AddressAlreadyAssigned(_)));

    // cross-subnet name reuse is allowed
    let alice_home = ClientRecord::new("ALICEHOME=", "alice", "home", v6("fd01::2"));
    store.make_client(&alice_home).unwrap();

    // but not within one subnet
    let imposter = ClientRecord::new("IMPOSTER=", "alice", "office", v6("fd00::9"));
    let err = store.make_client(&imposter).unwrap_err();
    assert!(matches!(err, Error::NameExistsInSubnet { .. }));

    let revoked = store.revoke_subnet("office").unwrap();
    assert_eq!(
        revoked.into_iter().collect::<Vec<_>>(),
        vec!["ALICEKEY=".to_string()]
    );
    assert!(store.get_clients("office").unwrap().is_empty());
    assert!(!store.get_subnets().unwrap().contains_key("office"));

    // the other subnet is untouched
    let home = store.get_clients("home").unwrap();
    assert_eq!(home.len(), 1);
    assert_eq!(home[0].name, "alice");
    assert_eq!(home[0].public_key, "ALICEHOME=");
}

#[test]
fn test_address_must_lie_in_subnet() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);
    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();

    // out of range fails regardless of global availability
    let stray = ClientRecord::new("STRAY=", "stray", "office", v6("fd09::1"));
    let err = store.make_client(&stray).unwrap_err();
    assert!(matches!(err, Error::AddressNotInSubnet { .. }));
    assert!(store.get_clients("office").unwrap().is_empty());
}

#[test]
fn test_unregistered_subnet_is_a_contract_violation() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);

    let orphan = ClientRecord::new("ORPHAN=", "orphan", "nowhere", v6("fd00::1"));
    let err = store.make_client(&orphan).unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn test_forward_and_reverse_indexes_agree() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);
    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();

    let record = ClientRecord::new("ALICEKEY=", "alice", "office", v6("fd00::1"))
        .with_address4(v4("10.20.0.50"))
        .with_email("alice@example.com");
    store.make_client(&record).unwrap();

    assert!(store.is_address6_used(v6("fd00::1")).unwrap());
    assert!(store.is_address4_used(v4("10.20.0.50")).unwrap());
    assert!(!store.is_address6_used(v6("fd00::2")).unwrap());
    assert!(!store.is_address4_used(v4("10.20.0.51")).unwrap());

    // the server's own addresses always read as used
    assert!(store.is_address6_used(v6("fd00:aaaa::1")).unwrap());
    assert!(store.is_address4_used(v4("10.20.0.1")).unwrap());

    // round-trip: the joined record carries the same addresses back
    let clients = store.get_clients("office").unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0], record);

    // revocation releases both families
    store.revoke_client("ALICEKEY=").unwrap();
    assert!(!store.is_address6_used(v6("fd00::1")).unwrap());
    assert!(!store.is_address4_used(v4("10.20.0.50")).unwrap());
    assert!(store.get_clients("office").unwrap().is_empty());
}

#[test]
fn test_ipv4_validation() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);
    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();

    // network and broadcast addresses are not usable
    for bad in ["10.20.0.0", "10.20.255.255", "192.168.1.5"] {
        let record = ClientRecord::new("X=", "x", "office", v6("fd00::1")).with_address4(v4(bad));
        let err = store.make_client(&record).unwrap_err();
        assert!(matches!(err, Error::AddressNotUsable(_)), "{bad}");
    }

    // the server's own IPv4 address is taken
    let record =
        ClientRecord::new("X=", "x", "office", v6("fd00::1")).with_address4(v4("10.20.0.1"));
    let err = store.make_client(&record).unwrap_err();
    assert!(matches!(err, Error::AddressAlreadyAssigned(_)));

    // a failed make_client writes nothing
    assert!(!store.is_address6_used(v6("fd00::1")).unwrap());

    // duplicate IPv4 across subnets is still rejected
    let a = ClientRecord::new("A=", "a", "office", v6("fd00::1")).with_address4(v4("10.20.0.50"));
    store.make_client(&a).unwrap();
    let b = ClientRecord::new("B=", "b", "office", v6("fd00::2")).with_address4(v4("10.20.0.50"));
    let err = store.make_client(&b).unwrap_err();
    assert!(matches!(err, Error::AddressAlreadyAssigned(_)));
}

#[test]
fn test_duplicate_public_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);
    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();

    let first = ClientRecord::new("SAMEKEY=", "first", "office", v6("fd00::1"));
    store.make_client(&first).unwrap();
    let second = ClientRecord::new("SAMEKEY=", "second", "office", v6("fd00::2"));
    let err = store.make_client(&second).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[test]
fn test_revoke_unknown_names() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);

    let err = store.revoke_subnet("nowhere").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(err.is_recoverable());

    let err = store.revoke_client("GHOST=").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn test_optional_fields_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open_configured(&dir);
    store.create_subnet("office", "fd00::/112".parse().unwrap()).unwrap();

    let bare = ClientRecord::new("BARE=", "bare", "office", v6("fd00::1"));
    let full = ClientRecord::new("FULL=", "full", "office", v6("fd00::2"))
        .with_address4(v4("10.20.0.60"))
        .with_email("full@example.com");
    store.make_client(&bare).unwrap();
    store.make_client(&full).unwrap();

    let mut clients = store.get_clients("office").unwrap();
    clients.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(clients[0].address4, None);
    assert_eq!(clients[0].email, None);
    assert_eq!(clients[1].address4, Some(v4("10.20.0.60")));
    assert_eq!(clients[1].email.as_deref(), Some("full@example.com"));

    // revoking a client without optional entries is fine
    store.revoke_client("BARE=").unwrap();
    assert_eq!(store.get_clients("office").unwrap().len(), 1);
}
