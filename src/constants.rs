//! Object classes, attribute names and other wire-level names shared by
//! the whole gateway.

pub const OC_TOP: &str = "top";
pub const OC_DOMAIN: &str = "domain";
pub const OC_NS_CONTAINER: &str = "nsContainer";
pub const OC_ORGANIZATIONAL_UNIT: &str = "organizationalUnit";
pub const OC_SUBSCHEMA: &str = "subschema";

pub const OC_USER: &str = "user";
pub const OC_ORG_PERSON: &str = "organizationalPerson";
pub const OC_INET_ORG_PERSON: &str = "inetOrgPerson";
pub const OC_AK_USER: &str = "goauthentik.io/ldap/user";
pub const OC_POSIX_ACCOUNT: &str = "posixAccount";

pub const OC_GROUP: &str = "group";
pub const OC_GROUP_OF_UNIQUE_NAMES: &str = "groupOfUniqueNames";
pub const OC_GROUP_OF_NAMES: &str = "groupOfNames";
pub const OC_AK_GROUP: &str = "goauthentik.io/ldap/group";
pub const OC_AK_VIRTUAL_GROUP: &str = "goauthentik.io/ldap/virtual-group";
pub const OC_POSIX_GROUP: &str = "posixGroup";

pub const OU_USERS: &str = "users";
pub const OU_GROUPS: &str = "groups";
pub const OU_VIRTUAL_GROUPS: &str = "virtual-groups";

/// Request no attributes at all.
pub const SEARCH_ATTRIBUTE_NONE: &str = "1.1";
/// Request every user attribute.
pub const SEARCH_ATTRIBUTE_ALL_USER: &str = "*";
/// Request every operational attribute.
pub const SEARCH_ATTRIBUTE_ALL_OPERATIONAL: &str = "+";

pub const SUBSCHEMA_DN: &str = "cn=subschema";

/// Attributes only returned when asked for by name or through `+`.
pub const OPERATIONAL_ATTRIBUTES: &[&str] = &[
    "createTimestamp",
    "modifyTimestamp",
    "creatorsName",
    "modifiersName",
    "entryDN",
    "entryUUID",
    "hasSubordinates",
    "structuralObjectClass",
    "subschemaSubentry",
];

pub const ATTR_ACTIVE: &str = "ak-active";
pub const ATTR_SUPERUSER: &str = "ak-superuser";
pub const ATTR_LEGACY_ACTIVE: &str = "goauthentik.io/ldap/active";
pub const ATTR_LEGACY_SUPERUSER: &str = "goauthentik.io/ldap/superuser";

/// Header carrying the LDAP filter of the search that caused an API call.
pub const HEADER_LDAP_QUERY: &str = "X-authentik-outpost-ldap-query";
/// Header used to delegate the LDAP client address to the flow executor.
pub const HEADER_REMOTE_IP: &str = "X-authentik-remote-ip";
/// Header proving the gateway may delegate client addresses.
pub const HEADER_OUTPOST_TOKEN: &str = "X-authentik-outpost-token";

pub const VENDOR_NAME: &str = "goauthentik.io";
pub const VENDOR_VERSION: &str =
    concat!("LDAP gateway ", env!("CARGO_PKG_VERSION"));

pub fn domain_object_classes() -> &'static [&'static str] {
    &[OC_TOP, OC_DOMAIN]
}

pub fn container_object_classes() -> &'static [&'static str] {
    &[OC_TOP, OC_NS_CONTAINER, OC_ORGANIZATIONAL_UNIT]
}

pub fn user_object_classes() -> &'static [&'static str] {
    &[
        OC_USER,
        OC_ORG_PERSON,
        OC_INET_ORG_PERSON,
        OC_AK_USER,
        OC_POSIX_ACCOUNT,
    ]
}

pub fn group_object_classes() -> &'static [&'static str] {
    &[
        OC_GROUP,
        OC_GROUP_OF_UNIQUE_NAMES,
        OC_GROUP_OF_NAMES,
        OC_AK_GROUP,
        OC_POSIX_GROUP,
    ]
}

pub fn virtual_group_object_classes() -> &'static [&'static str] {
    &[
        OC_GROUP,
        OC_GROUP_OF_UNIQUE_NAMES,
        OC_GROUP_OF_NAMES,
        OC_AK_GROUP,
        OC_AK_VIRTUAL_GROUP,
        OC_POSIX_GROUP,
    ]
}

/// Whether a search narrowed to `filter_class` can return entries of one of
/// `classes`. An empty filter class means the filter does not narrow.
pub fn includes_object_class(filter_class: &str, classes: &[&str]) -> bool {
    filter_class.is_empty()
        || classes.iter().any(|c| c.eq_ignore_ascii_case(filter_class))
}
