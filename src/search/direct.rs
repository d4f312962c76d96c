//! Search by querying the identity API for every request.

use std::sync::Arc;

use async_trait::async_trait;

use super::{SearchRequest, Searcher, assemble, bound_flags, only_me};
use crate::api::model::{Group, User};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter;
use crate::provider::{ProviderContext, UserFlags};

pub struct DirectSearcher {
    ctx: Arc<ProviderContext>,
}

impl DirectSearcher {
    pub fn new(ctx: Arc<ProviderContext>) -> Self {
        Self { ctx }
    }

    /// The caller's own record, fetched once then kept in their flags.
    async fn own_user(
        &self,
        request: &SearchRequest,
        flags: UserFlags,
    ) -> Result<User> {
        if let Some(user) = flags.user {
            return Ok(user);
        }

        let user = self.ctx.api.user(flags.user_pk).await?;
        self.ctx
            .bound_users
            .update(&request.bind_dn, |f| f.user = Some(user.clone()))
            .await;
        Ok(user)
    }
}

#[async_trait]
impl Searcher for DirectSearcher {
    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Entry>> {
        let ctx = &self.ctx;
        let flags = bound_flags(ctx, request).await?;
        let base = Dn::parse(&request.base_dn)?;

        if !flags.can_search {
            let user = self.own_user(request, flags).await?;
            return Ok(only_me(ctx, request, &base, &user));
        }

        let (need_users, need_groups) =
            ctx.needed_objects(&base, &request.scope, &request.filter_class);
        let user_query = need_users
            .then(|| filter::user_query(&request.filter))
            .flatten();
        let group_query = need_groups
            .then(|| filter::group_query(&request.filter))
            .flatten();
        if (need_users && user_query.is_none())
            || (need_groups && group_query.is_none())
        {
            tracing::debug!(
                filter = %filter::render(&request.filter),
                "filter cannot match, skipping API call"
            );
        }

        let users = async {
            match &user_query {
                Some(query) => ctx.api.users(query).await.map(Some),
                None => Ok(None),
            }
        };
        let groups = async {
            match &group_query {
                Some(query) => ctx.api.groups(query).await.map(Some),
                None => Ok(None),
            }
        };
        let (users, groups): (Option<Vec<User>>, Option<Vec<Group>>) =
            tokio::try_join!(users, groups).inspect_err(|err| {
                tracing::warn!(
                    provider = %ctx.name,
                    filter = %filter::render(&request.filter),
                    error = %err,
                    "failed to fetch directory objects"
                );
            })?;

        Ok(assemble(
            ctx,
            request,
            &base,
            users.as_deref(),
            groups.as_deref(),
        ))
    }
}
