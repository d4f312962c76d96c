//! Search strategies: ask the identity API on every search, or answer from
//! an in-memory snapshot.

pub mod direct;
pub mod memory;

use async_trait::async_trait;
use ldap3_proto::proto::{LdapFilter, LdapSearchScope};

use crate::api::model::{Group, User};
use crate::constants::{
    container_object_classes, domain_object_classes, group_object_classes,
    includes_object_class, user_object_classes, virtual_group_object_classes,
};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{GatewayError, Result};
use crate::filter;
use crate::provider::{Container, ProviderContext, UserFlags, in_scope};
use crate::synthesis::{self, schema};
pub use direct::DirectSearcher;
pub use memory::MemorySearcher;

/// A search as received from a client.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// DN bound on the connection, empty when anonymous.
    pub bind_dn: String,
    pub base_dn: String,
    pub scope: LdapSearchScope,
    pub filter: LdapFilter,
    pub attributes: Vec<String>,
    /// Object class the filter narrows to, lower-cased.
    pub filter_class: String,
}

impl SearchRequest {
    pub fn new(
        bind_dn: impl Into<String>,
        base_dn: impl Into<String>,
        scope: LdapSearchScope,
        filter: LdapFilter,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            base_dn: base_dn.into(),
            scope,
            filter_class: filter::object_class(&filter),
            filter,
            attributes,
        }
    }
}

#[async_trait]
pub trait Searcher: Send + Sync {
    fn context(&self) -> &ProviderContext;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Entry>>;

    /// Root DSE of the provider.
    fn search_base(&self, _request: &SearchRequest) -> Result<Vec<Entry>> {
        Ok(vec![synthesis::root_dse(self.context())])
    }

    fn search_subschema(&self, _request: &SearchRequest) -> Result<Vec<Entry>> {
        Ok(vec![schema::subschema()])
    }
}

/// Flags of the DN a search is made as. Anonymous searches, foreign DNs and
/// DNs that never bound are refused.
pub(crate) async fn bound_flags(
    ctx: &ProviderContext,
    request: &SearchRequest,
) -> Result<UserFlags> {
    if request.bind_dn.is_empty() {
        return Err(GatewayError::AnonymousSearch);
    }

    let bind_dn = Dn::parse(&request.bind_dn)?;
    if !ctx.base().is_ancestor_of(&bind_dn) {
        return Err(GatewayError::OutsideBaseDn {
            bind_dn: request.bind_dn.clone(),
            base_dn: ctx.base_dn.clone(),
        });
    }

    ctx.bound_users
        .get(&request.bind_dn)
        .await
        .ok_or_else(|| GatewayError::NotBound(request.bind_dn.clone()))
}

fn visible(dn: &str, base: &Dn, scope: &LdapSearchScope) -> bool {
    Dn::parse(dn).is_ok_and(|dn| in_scope(&dn, base, scope))
}

/// Answer for a caller who may not search: their own entry, if the search
/// reaches it.
pub(crate) fn only_me(
    ctx: &ProviderContext,
    request: &SearchRequest,
    base: &Dn,
    user: &User,
) -> Vec<Entry> {
    let entry = synthesis::user_entry(ctx, user);
    if visible(&entry.dn, base, &request.scope) {
        vec![entry]
    } else {
        Vec::new()
    }
}

/// Every entry below `base` the request can see, built from the given
/// listings. A `None` listing contributes nothing.
pub(crate) fn assemble(
    ctx: &ProviderContext,
    request: &SearchRequest,
    base: &Dn,
    users: Option<&[User]>,
    groups: Option<&[Group]>,
) -> Vec<Entry> {
    let class = request.filter_class.as_str();
    let scope = &request.scope;
    let mut entries = Vec::new();

    if in_scope(ctx.base(), base, scope)
        && includes_object_class(class, domain_object_classes())
    {
        entries.push(synthesis::base_entry(ctx));
    }

    let container = |kind: Container, entries: &mut Vec<Entry>| {
        if in_scope(ctx.container(kind), base, scope)
            && includes_object_class(class, container_object_classes())
        {
            entries.push(synthesis::container_entry(ctx, kind));
        }
    };

    container(Container::Users, &mut entries);
    if let Some(users) = users {
        if includes_object_class(class, user_object_classes()) {
            entries.extend(
                users
                    .iter()
                    .map(|u| synthesis::user_entry(ctx, u))
                    .filter(|e| visible(&e.dn, base, scope)),
            );
        }
    }

    container(Container::Groups, &mut entries);
    if let Some(groups) = groups {
        if includes_object_class(class, group_object_classes()) {
            entries.extend(
                groups
                    .iter()
                    .map(|g| synthesis::group_entry(ctx, g))
                    .filter(|e| visible(&e.dn, base, scope)),
            );
        }
    }

    container(Container::VirtualGroups, &mut entries);
    if let Some(users) = users {
        if includes_object_class(class, virtual_group_object_classes()) {
            entries.extend(
                users
                    .iter()
                    .map(|u| synthesis::virtual_group_entry(ctx, u))
                    .filter(|e| visible(&e.dn, base, scope)),
            );
        }
    }

    entries
}
