//! Search answered from a snapshot of every user and group, taken when the
//! provider is (re)loaded.

use std::sync::Arc;

use async_trait::async_trait;

use super::{SearchRequest, Searcher, assemble, bound_flags, only_me};
use crate::api::model::{Group, GroupQuery, User, UserQuery};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::Result;
use crate::provider::ProviderContext;

pub struct MemorySearcher {
    ctx: Arc<ProviderContext>,
    users: Vec<User>,
    groups: Vec<Group>,
}

impl MemorySearcher {
    /// Snapshot the directory of `ctx`'s identity API.
    pub async fn load(ctx: Arc<ProviderContext>) -> Result<Self> {
        let user_query = UserQuery::default();
        let group_query = GroupQuery::default();
        let (users, groups) = tokio::try_join!(
            ctx.api.users(&user_query),
            ctx.api.groups(&group_query),
        )?;
        tracing::info!(
            provider = %ctx.name,
            users = users.len(),
            groups = groups.len(),
            "loaded directory snapshot"
        );

        Ok(Self { ctx, users, groups })
    }
}

#[async_trait]
impl Searcher for MemorySearcher {
    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Entry>> {
        let ctx = &self.ctx;
        let flags = bound_flags(ctx, request).await?;
        let base = Dn::parse(&request.base_dn)?;

        if !flags.can_search {
            let user = self
                .users
                .iter()
                .find(|u| u.pk == flags.user_pk)
                .or(flags.user.as_ref());
            return Ok(match user {
                Some(user) => only_me(ctx, request, &base, user),
                None => {
                    tracing::debug!(bind_dn = %request.bind_dn, "bound user missing from snapshot");
                    Vec::new()
                },
            });
        }

        let (need_users, need_groups) =
            ctx.needed_objects(&base, &request.scope, &request.filter_class);
        Ok(assemble(
            ctx,
            request,
            &base,
            need_users.then_some(self.users.as_slice()),
            need_groups.then_some(self.groups.as_slice()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ldap3_proto::proto::{LdapFilter, LdapSearchScope};

    use super::*;
    use crate::testing::{self, MemoryApi, MemoryFlows};

    const BOB: &str = "cn=bob,ou=users,dc=ldap,dc=io";

    async fn searcher(api: Arc<MemoryApi>) -> Result<MemorySearcher> {
        let ctx = ProviderContext::new(
            &testing::provider(1, "ldap", "dc=ldap,dc=io"),
            Arc::default(),
            api,
            Arc::new(MemoryFlows::default()),
            Duration::from_secs(30),
        )?;
        MemorySearcher::load(Arc::new(ctx)).await
    }

    fn api() -> Arc<MemoryApi> {
        Arc::new(
            MemoryApi::default()
                .with_user(testing::user(1, "alice", &["admins"]))
                .with_user(testing::user(2, "bob", &[])),
        )
    }

    fn search(scope: LdapSearchScope, base_dn: &str) -> SearchRequest {
        SearchRequest::new(
            BOB,
            base_dn,
            scope,
            LdapFilter::Present("objectClass".into()),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_search_from_snapshot() {
        let api = api();
        let searcher = searcher(api.clone()).await.unwrap();
        searcher.ctx.bound_users.update(BOB, |f| f.can_search = true).await;

        let entries = searcher
            .search(&search(LdapSearchScope::OneLevel, "ou=users,dc=ldap,dc=io"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);

        let entries = searcher
            .search(&search(LdapSearchScope::Subtree, "dc=ldap,dc=io"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 9);
        assert_eq!(api.calls("users"), 1);
        assert_eq!(api.calls("groups"), 1);
    }

    #[tokio::test]
    async fn test_search_only_me() {
        let api = api();
        let searcher = searcher(api.clone()).await.unwrap();
        searcher.ctx.bound_users.update(BOB, |f| f.user_pk = 2).await;

        let entries = searcher
            .search(&search(LdapSearchScope::Subtree, "dc=ldap,dc=io"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dn, BOB);
        assert_eq!(api.calls("user"), 0);
    }

    #[tokio::test]
    async fn test_load_failure() {
        let api = api();
        api.set_failing(true);
        assert!(searcher(api).await.is_err());
    }
}
