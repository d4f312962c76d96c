//! Payloads exchanged with the identity API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Whether a provider talks to the API on every request or serves from
/// memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Direct,
    Cached,
}

/// LDAP provider configuration, one per tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub pk: i32,
    pub name: String,
    pub base_dn: String,
    pub bind_flow_slug: String,
    #[serde(default)]
    pub unbind_flow_slug: Option<String>,
    pub application_slug: String,
    /// Group whose members may search the whole directory.
    #[serde(default)]
    pub search_group: Option<String>,
    /// Keypair served for this provider's TLS server name.
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub tls_server_name: Option<String>,
    #[serde(default = "default_uid_start")]
    pub uid_start_number: i32,
    #[serde(default = "default_gid_start")]
    pub gid_start_number: i32,
    #[serde(default)]
    pub search_mode: AccessMode,
    #[serde(default)]
    pub bind_mode: AccessMode,
    #[serde(default)]
    pub mfa_support: bool,
}

fn default_uid_start() -> i32 {
    2000
}

fn default_gid_start() -> i32 {
    4000
}

/// Group as embedded in a user record.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
    pub pk: String,
    #[serde(default)]
    pub num_pk: i32,
    pub name: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// User record, listed with its groups.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub pk: i32,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups_obj: Vec<UserGroup>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// User as embedded in a group record.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub pk: i32,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Group record, listed with its members.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub pk: String,
    #[serde(default)]
    pub num_pk: i32,
    pub name: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub users_obj: Vec<GroupMember>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Reference to a group in the "who am I" response.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    pub pk: String,
    pub name: String,
}

/// The user a session belongs to.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub pk: i32,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupRef>,
}

/// Authenticated session established by a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub cookie: String,
    pub expires: DateTime<Utc>,
}

impl Session {
    /// Time left before the session expires, if any.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        (self.expires - Utc::now()).to_std().ok()
    }
}

/// Certificate and private key, PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub id: String,
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Query parameters of the users listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub groups_by_name: Vec<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    /// Filter of the search that caused this listing.
    pub ldap_filter: Option<String>,
}

impl UserQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("include_groups", "true".to_owned())];
        if let Some(username) = &self.username {
            params.push(("username", username.clone()));
        }
        if let Some(name) = &self.name {
            params.push(("name", name.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        for group in &self.groups_by_name {
            params.push(("groups_by_name", group.clone()));
        }
        if let Some(active) = self.is_active {
            params.push(("is_active", active.to_string()));
        }
        if let Some(superuser) = self.is_superuser {
            params.push(("is_superuser", superuser.to_string()));
        }
        params
    }
}

/// Query parameters of the groups listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupQuery {
    pub name: Option<String>,
    pub members_by_username: Vec<String>,
    pub is_superuser: Option<bool>,
    /// Filter of the search that caused this listing.
    pub ldap_filter: Option<String>,
}

impl GroupQuery {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("include_users", "true".to_owned())];
        if let Some(name) = &self.name {
            params.push(("name", name.clone()));
        }
        for username in &self.members_by_username {
            params.push(("members_by_username", username.clone()));
        }
        if let Some(superuser) = self.is_superuser {
            params.push(("is_superuser", superuser.to_string()));
        }
        params
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Pagination {
    #[serde(default)]
    pub next: u32,
}

/// One page of a listing endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default)]
    pub pagination: Pagination,
    pub results: Vec<T>,
}
