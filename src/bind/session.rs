//! Bind answered from a cache of successful binds, falling back to the
//! flow on a miss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ldap3_proto::proto::LdapResultCode;
use moka::Expiry;
use moka::future::Cache;
use sha2::{Digest, Sha256};

use super::{BindRequest, Binder, DirectBinder};
use crate::dn;
use crate::error::{GatewayError, Result};
use crate::provider::{ProviderContext, UserFlags};

const MAX_SESSIONS: u64 = 10_000;

/// Hash of the bind DN and password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialsKey([u8; 32]);

impl CredentialsKey {
    pub fn new(bind_dn: &str, password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(dn::normalize(bind_dn).as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// A successful bind, valid until its session expires.
#[derive(Debug, Clone)]
pub struct CachedBind {
    flags: UserFlags,
    ttl: Duration,
}

struct SessionExpiry;

impl Expiry<CredentialsKey, CachedBind> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &CredentialsKey,
        value: &CachedBind,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub type SessionCache = Cache<CredentialsKey, CachedBind>;

fn session_cache() -> SessionCache {
    Cache::builder()
        .max_capacity(MAX_SESSIONS)
        .expire_after(SessionExpiry)
        .build()
}

pub struct SessionBinder {
    inner: DirectBinder,
    sessions: SessionCache,
}

impl SessionBinder {
    /// Create a new [`SessionBinder`], keeping the sessions of a previous
    /// instance when given.
    pub fn new(
        ctx: Arc<ProviderContext>,
        sessions: Option<SessionCache>,
    ) -> Self {
        Self {
            inner: DirectBinder::new(ctx),
            sessions: sessions.unwrap_or_else(session_cache),
        }
    }
}

#[async_trait]
impl Binder for SessionBinder {
    fn context(&self) -> &ProviderContext {
        self.inner.context()
    }

    async fn bind(
        &self,
        username: &str,
        request: &BindRequest,
    ) -> Result<LdapResultCode> {
        let key = CredentialsKey::new(&request.dn, &request.password);
        if let Some(cached) = self.sessions.get(&key).await {
            tracing::debug!(bind_dn = %request.dn, "authenticated from session");
            let bound_users = &self.context().bound_users;
            if bound_users.get(&request.dn).await.is_none() {
                bound_users
                    .update(&request.dn, |flags| *flags = cached.flags)
                    .await;
            }
            return Ok(LdapResultCode::Success);
        }

        let code = self.inner.bind(username, request).await?;
        if code != LdapResultCode::Success {
            return Ok(code);
        }

        let Some(flags) = self.context().bound_users.get(&request.dn).await
        else {
            tracing::error!(bind_dn = %request.dn, "user flags not set after bind");
            return Err(GatewayError::internal("user flags not set after bind"));
        };

        match flags.session.as_ref().and_then(|s| s.remaining()) {
            Some(ttl) if !ttl.is_zero() => {
                self.sessions.insert(key, CachedBind { flags, ttl }).await;
            },
            _ => {
                tracing::debug!(bind_dn = %request.dn, "session already expired, not caching");
            },
        }
        Ok(code)
    }

    async fn unbind(&self, request: &BindRequest) -> Result<LdapResultCode> {
        self.inner.unbind(request).await
    }

    async fn warm_up(&self) {
        self.inner.warm_up().await
    }

    fn session_cache(&self) -> Option<SessionCache> {
        Some(self.sessions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FlowExecutor;
    use crate::testing::{self, MemoryApi, MemoryFlows};

    const ALICE: &str = "cn=alice,ou=users,dc=ldap,dc=io";

    fn binder(flows: Arc<MemoryFlows>) -> SessionBinder {
        let ctx = ProviderContext::new(
            &testing::provider(1, "ldap", "dc=ldap,dc=io"),
            Arc::default(),
            Arc::new(MemoryApi::default()),
            flows as Arc<dyn FlowExecutor>,
            Duration::from_secs(30),
        )
        .unwrap();
        SessionBinder::new(Arc::new(ctx), None)
    }

    fn request(password: &str) -> BindRequest {
        BindRequest {
            dn: ALICE.into(),
            password: password.into(),
            client_ip: None,
        }
    }

    #[test]
    fn test_credentials_key() {
        assert_eq!(
            CredentialsKey::new("CN=alice,dc=io", "a"),
            CredentialsKey::new("cn=alice, dc=io", "a")
        );
        assert_ne!(
            CredentialsKey::new("cn=alice,dc=io", "a"),
            CredentialsKey::new("cn=alice,dc=io", "b")
        );
    }

    #[tokio::test]
    async fn test_cached_bind() {
        let alice = testing::user(1, "alice", &[]);
        let flows = Arc::new(MemoryFlows::default().with_user(&alice, "secret"));
        let binder = binder(flows.clone());

        for _ in 0..2 {
            let code = binder.bind("alice", &request("secret")).await.unwrap();
            assert_eq!(code, LdapResultCode::Success);
        }
        assert_eq!(flows.calls("execute"), 1);

        // failures are never cached.
        for _ in 0..2 {
            let code = binder.bind("alice", &request("wrong")).await.unwrap();
            assert_eq!(code, LdapResultCode::InvalidCredentials);
        }
        assert_eq!(flows.calls("execute"), 3);
    }

    #[tokio::test]
    async fn test_cache_expires_with_session() {
        let alice = testing::user(1, "alice", &[]);
        let flows = Arc::new(
            MemoryFlows::default()
                .with_user(&alice, "secret")
                .session_ttl(chrono::Duration::milliseconds(300)),
        );
        let binder = binder(flows.clone());

        binder.bind("alice", &request("secret")).await.unwrap();
        binder.bind("alice", &request("secret")).await.unwrap();
        assert_eq!(flows.calls("execute"), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        binder.bind("alice", &request("secret")).await.unwrap();
        assert_eq!(flows.calls("execute"), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_restores_flags() {
        let alice = testing::user(1, "alice", &[]);
        let flows = Arc::new(MemoryFlows::default().with_user(&alice, "secret"));
        let binder = binder(flows.clone());

        binder.bind("alice", &request("secret")).await.unwrap();
        binder.context().bound_users.remove(ALICE).await;

        binder.bind("alice", &request("secret")).await.unwrap();
        assert_eq!(flows.calls("execute"), 1);
        assert_eq!(
            binder.context().bound_users.get(ALICE).await.unwrap().user_pk,
            1
        );
    }

    #[tokio::test]
    async fn test_cache_survives_handover() {
        let alice = testing::user(1, "alice", &[]);
        let flows = Arc::new(MemoryFlows::default().with_user(&alice, "secret"));
        let first = binder(flows.clone());
        first.bind("alice", &request("secret")).await.unwrap();

        let ctx = Arc::new(
            ProviderContext::new(
                &testing::provider(1, "ldap", "dc=ldap,dc=io"),
                Arc::default(),
                Arc::new(MemoryApi::default()),
                flows.clone(),
                Duration::from_secs(30),
            )
            .unwrap(),
        );
        let second = SessionBinder::new(ctx, first.session_cache());
        second.bind("alice", &request("secret")).await.unwrap();
        assert_eq!(flows.calls("execute"), 1);
    }
}
