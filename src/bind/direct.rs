//! Bind by running the provider's authentication flow every time.

use std::sync::Arc;

use async_trait::async_trait;
use ldap3_proto::proto::LdapResultCode;

use super::{BindRequest, Binder};
use crate::api::FlowAnswers;
use crate::api::model::SessionUser;
use crate::error::Result;
use crate::provider::ProviderContext;
use crate::provider::flags::INVALID_USER_PK;
use crate::telemetry::{self, RequestKind};

pub struct DirectBinder {
    ctx: Arc<ProviderContext>,
}

impl DirectBinder {
    pub fn new(ctx: Arc<ProviderContext>) -> Self {
        Self { ctx }
    }

    fn reject(
        &self,
        reason: &'static str,
        code: LdapResultCode,
    ) -> LdapResultCode {
        let app = &self.ctx.app_slug;
        telemetry::record_rejection(reason, RequestKind::Bind, app);
        code
    }

    fn can_search(&self, user: &SessionUser) -> bool {
        self.ctx.search_group.as_ref().is_some_and(|search_group| {
            user.groups
                .iter()
                .any(|g| g.pk == *search_group || g.name == *search_group)
        })
    }
}

#[async_trait]
impl Binder for DirectBinder {
    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    async fn bind(
        &self,
        username: &str,
        request: &BindRequest,
    ) -> Result<LdapResultCode> {
        let ctx = &self.ctx;
        let answers =
            FlowAnswers::new(username, &request.password, ctx.mfa_support)
                .client_ip(request.client_ip);

        let outcome = match ctx
            .flows
            .execute(&ctx.authentication_flow, &answers)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(bind_dn = %request.dn, error = %err, "failed to execute flow");
                return Ok(self
                    .reject("flow_error", LdapResultCode::InvalidCredentials));
            },
        };
        if !outcome.passed {
            tracing::info!(bind_dn = %request.dn, "invalid credentials");
            return Ok(self.reject(
                "invalid_credentials",
                LdapResultCode::InvalidCredentials,
            ));
        }
        let Some(session) = outcome.session else {
            tracing::warn!(bind_dn = %request.dn, "flow passed without a session");
            return Ok(
                self.reject("flow_error", LdapResultCode::InvalidCredentials)
            );
        };

        match ctx.flows.check_access(&session, ctx.id, &ctx.app_slug).await {
            Ok(true) => {},
            Ok(false) => {
                tracing::info!(bind_dn = %request.dn, "access denied for user");
                return Ok(self.reject(
                    "access_denied",
                    LdapResultCode::InsufficentAccessRights,
                ));
            },
            Err(err) => {
                tracing::warn!(bind_dn = %request.dn, error = %err, "failed to check access");
                return Ok(self.reject(
                    "access_check_fail",
                    LdapResultCode::OperationsError,
                ));
            },
        }

        let user = match ctx.flows.session_user(&session).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(bind_dn = %request.dn, error = %err, "failed to get user info");
                return Ok(self.reject(
                    "user_info_fail",
                    LdapResultCode::OperationsError,
                ));
            },
        };

        let can_search = self.can_search(&user);
        ctx.bound_users
            .update(&request.dn, |flags| {
                // flags from an earlier bind stay authoritative.
                if flags.user_pk == INVALID_USER_PK {
                    flags.user_pk = user.pk;
                    flags.can_search = can_search;
                }
                flags.session = Some(session);
            })
            .await;

        tracing::info!(bind_dn = %request.dn, user = %user.username, can_search, "user bound");
        Ok(LdapResultCode::Success)
    }

    async fn unbind(&self, request: &BindRequest) -> Result<LdapResultCode> {
        let ctx = &self.ctx;
        let flags = ctx.bound_users.remove(&request.dn).await;

        if let (Some(flow), Some(session)) = (
            ctx.invalidation_flow.as_deref(),
            flags.and_then(|f| f.session),
        ) {
            if let Err(err) =
                ctx.flows.invalidate(&session, flow, request.client_ip).await
            {
                tracing::warn!(bind_dn = %request.dn, error = %err, "failed to log out user");
            }
        }

        Ok(LdapResultCode::Success)
    }

    async fn warm_up(&self) {
        if let Err(err) = self
            .ctx
            .flows
            .warm_up(&self.ctx.authentication_flow)
            .await
        {
            tracing::warn!(provider = %self.ctx.name, error = %err, "failed to warm up flow");
        }
    }
}
