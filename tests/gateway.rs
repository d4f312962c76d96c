use std::sync::Arc;
use std::time::Duration;

use ldap3::exop::{WhoAmI, WhoAmIResp};
use ldap3::{Ldap, LdapConnAsync, Scope, SearchEntry};
use ldap_gateway::api::ApiCertificateStore;
use ldap_gateway::registry::Registry;
use ldap_gateway::testing::{self, MemoryApi, MemoryFlows};
use ldap_gateway::{Gateway, server};
use tokio::net::TcpListener;

const BASE_DN: &str = "dc=ldap,dc=io";
const ALICE: &str = "cn=alice,ou=users,dc=ldap,dc=io";
const BOB: &str = "cn=bob,ou=users,dc=ldap,dc=io";

const SUCCESS: u32 = 0;
const INVALID_CREDENTIALS: u32 = 49;
const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
const UNWILLING_TO_PERFORM: u32 = 53;

/// Start a gateway where alice may search and bob may not.
async fn start() -> String {
    let alice = testing::user(1, "alice", &["admins"]);
    let bob = testing::user(2, "bob", &[]);
    let mut config = testing::provider(1, "ldap", BASE_DN);
    config.search_group = Some("admins".into());

    let flows = Arc::new(
        MemoryFlows::default()
            .with_user(&alice, "secret")
            .with_user(&bob, "hunter2"),
    );
    let api = Arc::new(
        MemoryApi::default()
            .with_provider(config)
            .with_user(alice)
            .with_user(bob),
    );
    let registry = Registry::new(
        api.clone(),
        flows,
        Arc::new(ApiCertificateStore::new(api)),
        Duration::from_secs(30),
    );
    registry.refresh().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, Gateway::new(Arc::new(registry))));

    format!("ldap://{address}")
}

async fn connect(url: &str) -> Ldap {
    let (handle, ldap) = LdapConnAsync::new(url).await.unwrap();
    ldap3::drive!(handle);
    ldap
}

async fn search(
    ldap: &mut Ldap,
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<&str>,
) -> (u32, Vec<SearchEntry>) {
    let result = ldap.search(base, scope, filter, attrs).await.unwrap();
    let entries = result.0.into_iter().map(SearchEntry::construct).collect();
    (result.1.rc, entries)
}

#[tokio::test]
async fn test_bind_and_search() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    ldap.simple_bind(ALICE, "secret").await.unwrap().success().unwrap();

    let (rc, entries) = search(
        &mut ldap,
        BASE_DN,
        Scope::Subtree,
        "(objectClass=user)",
        vec!["cn", "mail"],
    )
    .await;
    assert_eq!(rc, SUCCESS);
    assert_eq!(entries.len(), 2);

    let alice = entries.iter().find(|e| e.dn == ALICE).unwrap();
    assert_eq!(alice.attrs["cn"], ["alice"]);
    assert_eq!(alice.attrs["mail"], ["alice@example.io"]);
    assert!(!alice.attrs.contains_key("uid"));

    let (_, entries) = search(
        &mut ldap,
        "ou=groups,dc=ldap,dc=io",
        Scope::OneLevel,
        "(member=cn=alice,ou=users,dc=ldap,dc=io)",
        vec!["1.1"],
    )
    .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].dn, "cn=admins,ou=groups,dc=ldap,dc=io");
    assert_eq!(entries[0].attrs.keys().collect::<Vec<_>>(), ["objectClass"]);

    ldap.unbind().await.unwrap();
}

#[tokio::test]
async fn test_bind_rejections() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    let result = ldap.simple_bind(BOB, "wrong").await.unwrap();
    assert_eq!(result.rc, INVALID_CREDENTIALS);

    let result = ldap
        .simple_bind("cn=bob,dc=other,dc=io", "hunter2")
        .await
        .unwrap();
    assert_eq!(result.rc, INSUFFICIENT_ACCESS_RIGHTS);

    // the connection is still usable after failures.
    let result = ldap.simple_bind(BOB, "hunter2").await.unwrap();
    assert_eq!(result.rc, SUCCESS);
}

#[tokio::test]
async fn test_anonymous() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    let (rc, entries) =
        search(&mut ldap, "", Scope::Base, "(objectClass=*)", Vec::new()).await;
    assert_eq!(rc, SUCCESS);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].attrs.contains_key("description"));

    let (rc, entries) = search(
        &mut ldap,
        BASE_DN,
        Scope::Subtree,
        "(objectClass=*)",
        Vec::new(),
    )
    .await;
    assert_eq!(rc, INSUFFICIENT_ACCESS_RIGHTS);
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_search_only_me() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    ldap.simple_bind(BOB, "hunter2").await.unwrap().success().unwrap();

    let (rc, entries) = search(
        &mut ldap,
        BASE_DN,
        Scope::Subtree,
        "(objectClass=*)",
        vec!["*"],
    )
    .await;
    assert_eq!(rc, SUCCESS);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].dn, BOB);
    assert_eq!(entries[0].attrs["displayName"], ["bob example"]);
}

#[tokio::test]
async fn test_root_dse_and_whoami() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    ldap.simple_bind(ALICE, "secret").await.unwrap().success().unwrap();

    let (rc, entries) = search(
        &mut ldap,
        "",
        Scope::Base,
        "(objectClass=*)",
        vec!["namingContexts", "supportedExtension"],
    )
    .await;
    assert_eq!(rc, SUCCESS);
    assert!(entries[0].attrs["namingContexts"].contains(&BASE_DN.to_owned()));
    assert_eq!(
        entries[0].attrs["supportedExtension"],
        ["1.3.6.1.4.1.4203.1.11.3"]
    );

    let (exop, _) = ldap.extended(WhoAmI).await.unwrap().success().unwrap();
    let whoami: WhoAmIResp = exop.parse();
    assert_eq!(whoami.authzid, format!("dn:{ALICE}"));
}

#[tokio::test]
async fn test_compare_unsupported() {
    let url = start().await;
    let mut ldap = connect(&url).await;

    ldap.simple_bind(ALICE, "secret").await.unwrap().success().unwrap();

    let compare = ldap.compare(ALICE, "cn", "alice").await.unwrap();
    assert_eq!(compare.0.rc, UNWILLING_TO_PERFORM);

    // The connection stays usable after the refusal.
    let (exop, _) = ldap.extended(WhoAmI).await.unwrap().success().unwrap();
    let whoami: WhoAmIResp = exop.parse();
    assert_eq!(whoami.authzid, format!("dn:{ALICE}"));
}
