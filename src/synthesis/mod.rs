//! Directory entries built from identity API records.
//!
//! Backend custom attributes come first; the attributes every client relies
//! on are then merged in without overwriting anything the backend already
//! supplied under the same name.

pub mod schema;

use serde_json::{Map, Value};

use crate::api::model::{Group, User};
use crate::constants::{
    ATTR_ACTIVE, ATTR_LEGACY_ACTIVE, ATTR_LEGACY_SUPERUSER, ATTR_SUPERUSER,
    OC_AK_VIRTUAL_GROUP, SUBSCHEMA_DN, VENDOR_NAME, VENDOR_VERSION,
    container_object_classes, domain_object_classes, group_object_classes,
    user_object_classes,
};
use crate::entry::{Entry, custom_attributes};
use crate::provider::{Container, ProviderContext};

const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Entry of a user, below the users container.
pub fn user_entry(ctx: &ProviderContext, user: &User) -> Entry {
    let mut entry = Entry {
        dn: ctx.user_dn(&user.username),
        attributes: custom_attributes(&user.attributes),
    };

    let active = user.is_active.unwrap_or_default().to_string();
    let superuser = user.is_superuser.to_string();
    let uid_number = ctx.uid_number(user);

    entry.ensure(ATTR_ACTIVE, [active.as_str()]);
    entry.ensure(ATTR_SUPERUSER, [superuser.as_str()]);
    entry.ensure(
        "memberOf",
        user.groups_obj.iter().map(|g| ctx.group_dn(&g.name)),
    );
    entry.ensure("cn", [user.username.as_str()]);
    entry.ensure("sAMAccountName", [user.username.as_str()]);
    entry.ensure("uid", [user.uid.as_str()]);
    entry.ensure("name", [user.name.as_str()]);
    entry.ensure("displayName", [user.name.as_str()]);
    entry.ensure("sn", [user.name.as_str()]);
    entry.ensure("mail", [user.email.as_deref().unwrap_or_default()]);
    entry.ensure("objectClass", user_object_classes().iter().copied());
    entry.ensure("uidNumber", [uid_number.as_str()]);
    entry.ensure("gidNumber", [uid_number.as_str()]);
    entry.ensure("homeDirectory", [format!("/home/{}", user.username)]);

    entry.ensure(ATTR_LEGACY_ACTIVE, [active]);
    entry.ensure(ATTR_LEGACY_SUPERUSER, [superuser]);
    entry
}

/// Group as exposed over LDAP, either backed by a real group or standing
/// for a single user.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapGroup {
    pub dn: String,
    pub cn: String,
    pub uid: String,
    pub gid_number: String,
    pub members: Vec<String>,
    pub is_superuser: bool,
    pub is_virtual: bool,
    pub attributes: Map<String, Value>,
}

impl LdapGroup {
    pub fn from_group(ctx: &ProviderContext, group: &Group) -> Self {
        Self {
            dn: ctx.group_dn(&group.name),
            cn: group.name.clone(),
            uid: group.pk.clone(),
            gid_number: ctx.gid_number(group),
            members: group
                .users_obj
                .iter()
                .map(|u| ctx.user_dn(&u.username))
                .collect(),
            is_superuser: group.is_superuser,
            is_virtual: false,
            attributes: group.attributes.clone(),
        }
    }

    /// Per-user primary group, for clients expecting one.
    pub fn from_user(ctx: &ProviderContext, user: &User) -> Self {
        Self {
            dn: ctx.virtual_group_dn(&user.username),
            cn: user.username.clone(),
            uid: user.uid.clone(),
            gid_number: ctx.uid_number(user),
            members: vec![ctx.user_dn(&user.username)],
            is_superuser: false,
            is_virtual: true,
            attributes: Map::new(),
        }
    }

    pub fn into_entry(self) -> Entry {
        let mut entry = Entry {
            dn: self.dn,
            attributes: custom_attributes(&self.attributes),
        };

        let superuser = self.is_superuser.to_string();
        let mut classes = group_object_classes().to_vec();
        if self.is_virtual {
            classes.push(OC_AK_VIRTUAL_GROUP);
        }

        entry.ensure(ATTR_SUPERUSER, [superuser.as_str()]);
        entry.ensure("objectClass", classes);
        entry.ensure("member", self.members);
        entry.ensure("cn", [self.cn.as_str()]);
        entry.ensure("uid", [self.uid.as_str()]);
        entry.ensure("sAMAccountName", [self.cn]);
        entry.ensure("gidNumber", [self.gid_number]);
        entry.ensure(ATTR_LEGACY_SUPERUSER, [superuser]);
        entry
    }
}

pub fn group_entry(ctx: &ProviderContext, group: &Group) -> Entry {
    LdapGroup::from_group(ctx, group).into_entry()
}

pub fn virtual_group_entry(ctx: &ProviderContext, user: &User) -> Entry {
    LdapGroup::from_user(ctx, user).into_entry()
}

pub fn container_entry(ctx: &ProviderContext, kind: Container) -> Entry {
    let dn = ctx.container_dn(kind);
    Entry::new(dn)
        .with("distinguishedName", [dn])
        .with("objectClass", container_object_classes().iter().copied())
        .with("ou", [kind.ou()])
}

fn naming_contexts(ctx: &ProviderContext) -> [&str; 3] {
    [
        ctx.base_dn.as_str(),
        ctx.container_dn(Container::Users),
        ctx.container_dn(Container::Groups),
    ]
}

/// Entry of the provider's base DN.
pub fn base_entry(ctx: &ProviderContext) -> Entry {
    let mut entry = Entry::new(ctx.base_dn.as_str())
        .with("distinguishedName", [ctx.base_dn.as_str()])
        .with("objectClass", domain_object_classes().iter().copied());
    if let Some(dc) = ctx.base().first_value("dc") {
        entry = entry.with("dc", [dc]);
    }
    entry
        .with("supportedLDAPVersion", ["3"])
        .with("namingContexts", naming_contexts(ctx))
        .with("vendorName", [VENDOR_NAME])
        .with("vendorVersion", [VENDOR_VERSION])
}

/// Root DSE as seen by a client of this provider.
pub fn root_dse(ctx: &ProviderContext) -> Entry {
    Entry::new("")
        .with("objectClass", domain_object_classes().iter().copied())
        .with("supportedLDAPVersion", ["3"])
        .with("supportedExtension", [WHOAMI_OID])
        .with("namingContexts", naming_contexts(ctx))
        .with("defaultNamingContext", [ctx.base_dn.as_str()])
        .with("rootDomainNamingContext", [ctx.base_dn.as_str()])
        .with("subschemaSubentry", [SUBSCHEMA_DN])
        .with("vendorName", [VENDOR_NAME])
        .with("vendorVersion", [VENDOR_VERSION])
}

/// Root DSE served when no provider owns a search.
pub fn unauthenticated_root_dse() -> Entry {
    Entry::new("")
        .with("objectClass", domain_object_classes().iter().copied())
        .with("supportedLDAPVersion", ["3"])
        .with(
            "description",
            ["This LDAP server requires an authenticated session."],
        )
        .with("vendorName", [VENDOR_NAME])
        .with("vendorVersion", [VENDOR_VERSION])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::model::GroupMember;
    use crate::provider::tests::context;
    use crate::testing;
    use serde_json::json;

    fn values(entry: &Entry, name: &str) -> Vec<String> {
        entry.get(name).map(<[String]>::to_vec).unwrap_or_default()
    }

    #[test]
    fn test_user_entry() {
        let ctx = context("dc=ldap,dc=example,dc=io");
        let mut alice = testing::user(1, "alice", &["admins"]);
        alice.name = "Alice A".into();

        let entry = user_entry(&ctx, &alice);
        assert_eq!(entry.dn, "cn=alice,ou=users,dc=ldap,dc=example,dc=io");
        assert_eq!(values(&entry, "displayName"), ["Alice A"]);
        assert_eq!(values(&entry, "cn"), ["alice"]);
        assert_eq!(
            values(&entry, "memberOf"),
            ["cn=admins,ou=groups,dc=ldap,dc=example,dc=io"]
        );
        assert_eq!(values(&entry, "uidNumber"), ["2001"]);
        assert_eq!(values(&entry, "gidNumber"), ["2001"]);
        assert_eq!(values(&entry, "homeDirectory"), ["/home/alice"]);
        assert_eq!(values(&entry, "ak-active"), ["true"]);
        assert_eq!(values(&entry, "goauthentik.io/ldap/active"), ["true"]);
        assert!(values(&entry, "objectClass").contains(&"inetOrgPerson".into()));
    }

    #[test]
    fn test_user_dn_keeps_case() {
        let ctx = context("dc=io");
        let entry = user_entry(&ctx, &testing::user(2, "Bob", &[]));
        assert_eq!(entry.dn, "cn=Bob,ou=users,dc=io");
        assert!(entry.get("memberOf").is_none());
    }

    #[test]
    fn test_custom_attributes_win() {
        let ctx = context("dc=io");
        let mut user = testing::user(3, "carol", &[]);
        user.attributes = json!({
            "mail": "other@example.io",
            "extraAttribute": "bar",
            "uidNumber": 5000,
        })
        .as_object()
        .cloned()
        .unwrap();

        let entry = user_entry(&ctx, &user);
        assert_eq!(values(&entry, "mail"), ["other@example.io"]);
        assert_eq!(values(&entry, "extraAttribute"), ["bar"]);
        assert_eq!(values(&entry, "uidNumber"), ["5000"]);
        assert_eq!(values(&entry, "gidNumber"), ["5000"]);
    }

    #[test]
    fn test_group_entry() {
        let ctx = context("dc=io");
        let group = Group {
            pk: "f00".into(),
            num_pk: 12,
            name: "admins".into(),
            is_superuser: true,
            users_obj: vec![GroupMember {
                pk: 1,
                username: "alice".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let entry = group_entry(&ctx, &group);
        assert_eq!(entry.dn, "cn=admins,ou=groups,dc=io");
        assert_eq!(values(&entry, "member"), ["cn=alice,ou=users,dc=io"]);
        assert_eq!(values(&entry, "gidNumber"), ["4012"]);
        assert_eq!(values(&entry, "ak-superuser"), ["true"]);
        assert_eq!(values(&entry, "uid"), ["f00"]);
        assert!(
            !values(&entry, "objectClass")
                .contains(&OC_AK_VIRTUAL_GROUP.to_owned())
        );
    }

    #[test]
    fn test_virtual_group_entry() {
        let ctx = context("dc=io");
        let alice = testing::user(1, "alice", &["admins", "staff"]);

        let entry = virtual_group_entry(&ctx, &alice);
        assert_eq!(entry.dn, "cn=alice,ou=virtual-groups,dc=io");
        assert_eq!(
            values(&entry, "member"),
            [user_entry(&ctx, &alice).dn]
        );
        assert_eq!(values(&entry, "gidNumber"), ["2001"]);
        assert!(
            values(&entry, "objectClass")
                .contains(&OC_AK_VIRTUAL_GROUP.to_owned())
        );
    }

    #[test]
    fn test_base_and_root_entries() {
        let ctx = context("DC=ldap,DC=io");
        let base = base_entry(&ctx);
        assert_eq!(base.dn, "dc=ldap,dc=io");
        assert_eq!(values(&base, "dc"), ["ldap"]);
        assert_eq!(values(&base, "namingContexts").len(), 3);

        let root = root_dse(&ctx);
        assert_eq!(root.dn, "");
        assert_eq!(values(&root, "subschemaSubentry"), [SUBSCHEMA_DN]);

        let users = container_entry(&ctx, Container::Users);
        assert_eq!(users.dn, "ou=users,dc=ldap,dc=io");
        assert_eq!(values(&users, "ou"), ["users"]);
    }
}
