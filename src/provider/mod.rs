//! One configured LDAP tenant: its naming, its collaborators and the
//! binder/searcher pair serving it.

pub mod flags;

use std::sync::Arc;
use std::time::Duration;

use ldap3_proto::proto::LdapSearchScope;

use crate::api::model::{Group, ProviderConfig, User};
use crate::api::{FlowExecutor, IdentityApi};
use crate::bind::Binder;
use crate::constants::{
    OU_GROUPS, OU_USERS, OU_VIRTUAL_GROUPS, group_object_classes,
    includes_object_class, user_object_classes, virtual_group_object_classes,
};
use crate::dn::Dn;
use crate::error::{GatewayError, Result};
use crate::search::Searcher;
pub use flags::{BoundUsers, UserFlags};

/// Synthetic organizational units below a base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Users,
    Groups,
    VirtualGroups,
}

impl Container {
    pub const ALL: [Container; 3] =
        [Container::Users, Container::Groups, Container::VirtualGroups];

    pub fn ou(self) -> &'static str {
        match self {
            Container::Users => OU_USERS,
            Container::Groups => OU_GROUPS,
            Container::VirtualGroups => OU_VIRTUAL_GROUPS,
        }
    }
}

/// Everything a binder or searcher needs to know about its provider.
pub struct ProviderContext {
    pub id: i32,
    pub name: String,
    /// Lower-cased base DN.
    pub base_dn: String,
    pub app_slug: String,
    pub authentication_flow: String,
    pub invalidation_flow: Option<String>,
    pub search_group: Option<String>,
    pub certificate: Option<String>,
    pub tls_server_name: Option<String>,
    pub uid_start_number: i32,
    pub gid_start_number: i32,
    pub mfa_support: bool,
    /// How long a closed connection's flags are kept.
    pub eviction_delay: Duration,
    pub bound_users: Arc<BoundUsers>,
    pub api: Arc<dyn IdentityApi>,
    pub flows: Arc<dyn FlowExecutor>,
    base: Dn,
    containers: [(Dn, String); 3],
}

impl ProviderContext {
    pub fn new(
        config: &ProviderConfig,
        bound_users: Arc<BoundUsers>,
        api: Arc<dyn IdentityApi>,
        flows: Arc<dyn FlowExecutor>,
        eviction_delay: Duration,
    ) -> Result<Self> {
        let base = Dn::parse(&config.base_dn)?;
        if base.is_empty() {
            return Err(GatewayError::internal(format!(
                "provider {} has an empty base DN",
                config.name
            )));
        }
        let base_dn = base.to_string();
        let container = |kind: Container| -> Result<(Dn, String)> {
            let dn = format!("ou={},{base_dn}", kind.ou());
            Ok((Dn::parse(&dn)?, dn))
        };
        let containers = [
            container(Container::Users)?,
            container(Container::Groups)?,
            container(Container::VirtualGroups)?,
        ];

        Ok(Self {
            id: config.pk,
            name: config.name.clone(),
            base_dn,
            app_slug: config.application_slug.clone(),
            authentication_flow: config.bind_flow_slug.clone(),
            invalidation_flow: config.unbind_flow_slug.clone(),
            search_group: config.search_group.clone(),
            certificate: config.certificate.clone(),
            tls_server_name: config.tls_server_name.clone(),
            uid_start_number: config.uid_start_number,
            gid_start_number: config.gid_start_number,
            mfa_support: config.mfa_support,
            eviction_delay,
            bound_users,
            api,
            flows,
            base,
            containers,
        })
    }

    pub fn base(&self) -> &Dn {
        &self.base
    }

    pub fn container(&self, kind: Container) -> &Dn {
        &self.containers[kind as usize].0
    }

    pub fn container_dn(&self, kind: Container) -> &str {
        &self.containers[kind as usize].1
    }

    pub fn user_dn(&self, username: &str) -> String {
        format!("cn={username},{}", self.container_dn(Container::Users))
    }

    pub fn group_dn(&self, name: &str) -> String {
        format!("cn={name},{}", self.container_dn(Container::Groups))
    }

    pub fn virtual_group_dn(&self, username: &str) -> String {
        format!("cn={username},{}", self.container_dn(Container::VirtualGroups))
    }

    /// POSIX uid of a user, overridable through the `uidNumber` attribute.
    pub fn uid_number(&self, user: &User) -> String {
        numeric_attribute(&user.attributes, "uidNumber")
            .unwrap_or_else(|| posix_number(self.uid_start_number, user.pk))
    }

    /// POSIX gid of a group, overridable through the `gidNumber` attribute.
    pub fn gid_number(&self, group: &Group) -> String {
        numeric_attribute(&group.attributes, "gidNumber")
            .unwrap_or_else(|| {
                posix_number(self.gid_start_number, group.num_pk)
            })
    }

    /// Which backend listings a search can need: `(users, groups)`.
    ///
    /// Users also back the virtual groups. A listing is needed when the
    /// filter's object class allows its entries and the search scope can
    /// reach the container holding them.
    pub fn needed_objects(
        &self,
        base: &Dn,
        scope: &LdapSearchScope,
        filter_class: &str,
    ) -> (bool, bool) {
        let needs = |kind: Container, classes: &[&str]| {
            includes_object_class(filter_class, classes)
                && reaches(base, self.container(kind), scope)
        };

        let users = needs(Container::Users, user_object_classes())
            || needs(Container::VirtualGroups, virtual_group_object_classes());
        let groups = needs(Container::Groups, group_object_classes());
        (users, groups)
    }
}

/// `start + pk`, widened so large keys never overflow.
fn posix_number(start: i32, pk: i32) -> String {
    (i64::from(start) + i64::from(pk)).to_string()
}

fn numeric_attribute(
    attributes: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    match attributes.get(key)? {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if s.parse::<i64>().is_ok() => {
            Some(s.clone())
        },
        _ => None,
    }
}

/// Whether an entry at `dn` is visible from `base` under `scope`.
pub fn in_scope(dn: &Dn, base: &Dn, scope: &LdapSearchScope) -> bool {
    dn.depth_below(base)
        .is_some_and(|depth| scope_allows(scope, depth))
}

fn scope_allows(scope: &LdapSearchScope, depth: usize) -> bool {
    match scope {
        LdapSearchScope::Base => depth == 0,
        LdapSearchScope::OneLevel => depth == 1,
        LdapSearchScope::Subtree => true,
        LdapSearchScope::Children => depth >= 1,
    }
}

/// Whether a search from `base` can return direct children of `container`.
fn reaches(base: &Dn, container: &Dn, scope: &LdapSearchScope) -> bool {
    let depth = match container.depth_below(base) {
        Some(depth) => depth + 1,
        None if base.is_descendant_of(container) => 0,
        None => return false,
    };
    scope_allows(scope, depth)
}

/// A provider ready to serve requests.
pub struct ProviderInstance {
    pub context: Arc<ProviderContext>,
    pub binder: Box<dyn Binder>,
    pub searcher: Box<dyn Searcher>,
}

impl std::fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderInstance")
            .field("name", &self.context.name)
            .field("base_dn", &self.context.base_dn)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::{self, MemoryApi, MemoryFlows};

    pub(crate) fn context(base_dn: &str) -> ProviderContext {
        ProviderContext::new(
            &testing::provider(1, "ldap", base_dn),
            Arc::default(),
            Arc::new(MemoryApi::default()),
            Arc::new(MemoryFlows::default()),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    fn dn(input: &str) -> Dn {
        Dn::parse(input).unwrap()
    }

    #[test]
    fn test_naming() {
        let ctx = context("DC=ldap,DC=goauthentik,DC=io");
        assert_eq!(ctx.base_dn, "dc=ldap,dc=goauthentik,dc=io");
        assert_eq!(
            ctx.container_dn(Container::VirtualGroups),
            "ou=virtual-groups,dc=ldap,dc=goauthentik,dc=io"
        );
        assert_eq!(
            ctx.user_dn("alice"),
            "cn=alice,ou=users,dc=ldap,dc=goauthentik,dc=io"
        );
        assert_eq!(
            ctx.group_dn("admins"),
            "cn=admins,ou=groups,dc=ldap,dc=goauthentik,dc=io"
        );
    }

    #[test]
    fn test_empty_base_dn() {
        let result = ProviderContext::new(
            &testing::provider(1, "ldap", ""),
            Arc::default(),
            Arc::new(MemoryApi::default()),
            Arc::new(MemoryFlows::default()),
            Duration::ZERO,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_posix_numbers() {
        let ctx = context("dc=io");
        let mut user = testing::user(5, "alice", &[]);
        assert_eq!(ctx.uid_number(&user), "2005");

        user.attributes
            .insert("uidNumber".into(), serde_json::json!(10001));
        assert_eq!(ctx.uid_number(&user), "10001");

        let group = Group {
            num_pk: 3,
            ..Default::default()
        };
        assert_eq!(ctx.gid_number(&group), "4003");
    }

    #[test]
    fn test_posix_numbers_do_not_overflow() {
        let ctx = context("dc=io");
        let user = testing::user(i32::MAX, "alice", &[]);
        assert_eq!(ctx.uid_number(&user), "2147485647");

        let group = Group {
            num_pk: i32::MAX - 1,
            ..Default::default()
        };
        assert_eq!(ctx.gid_number(&group), "2147487646");
    }

    #[test]
    fn test_needed_objects() {
        let ctx = context("dc=ldap,dc=io");
        let base = ctx.base().clone();

        assert_eq!(
            ctx.needed_objects(&base, &LdapSearchScope::Subtree, ""),
            (true, true)
        );
        assert_eq!(
            ctx.needed_objects(&base, &LdapSearchScope::OneLevel, ""),
            (false, false)
        );
        assert_eq!(
            ctx.needed_objects(&base, &LdapSearchScope::Subtree, "posixgroup"),
            (false, true)
        );
        assert_eq!(
            ctx.needed_objects(
                &base,
                &LdapSearchScope::Subtree,
                "goauthentik.io/ldap/virtual-group"
            ),
            (true, false)
        );

        let users = dn("ou=users,dc=ldap,dc=io");
        assert_eq!(
            ctx.needed_objects(&users, &LdapSearchScope::OneLevel, ""),
            (true, false)
        );
        assert_eq!(
            ctx.needed_objects(&users, &LdapSearchScope::Base, ""),
            (false, false)
        );

        let alice = dn("cn=alice,ou=users,dc=ldap,dc=io");
        assert_eq!(
            ctx.needed_objects(&alice, &LdapSearchScope::Base, "user"),
            (true, false)
        );
        assert_eq!(
            ctx.needed_objects(&dn("dc=other,dc=io"), &LdapSearchScope::Subtree, ""),
            (false, false)
        );
    }

    #[test]
    fn test_in_scope() {
        let base = dn("ou=users,dc=io");
        let alice = dn("cn=alice,ou=users,dc=io");
        assert!(in_scope(&base, &base, &LdapSearchScope::Base));
        assert!(!in_scope(&alice, &base, &LdapSearchScope::Base));
        assert!(in_scope(&alice, &base, &LdapSearchScope::OneLevel));
        assert!(!in_scope(&base, &base, &LdapSearchScope::Children));
        assert!(!in_scope(&dn("dc=io"), &base, &LdapSearchScope::Subtree));
    }
}
