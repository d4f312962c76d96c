//! Bind strategies: every bind runs the authentication flow, or repeated
//! binds are answered from a session cache.

pub mod direct;
pub mod session;

use std::net::IpAddr;

use async_trait::async_trait;
use ldap3_proto::proto::LdapResultCode;

use crate::dn::Dn;
use crate::error::{GatewayError, Result};
use crate::provider::ProviderContext;
pub use direct::DirectBinder;
pub use session::{SessionBinder, SessionCache};

/// Credentials of a bind, or the DN being unbound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRequest {
    pub dn: String,
    pub password: String,
    pub client_ip: Option<IpAddr>,
}

#[async_trait]
pub trait Binder: Send + Sync {
    fn context(&self) -> &ProviderContext;

    /// Username behind `dn`: the `cn` of its first relative name, for DNs
    /// below the provider's base DN.
    fn username(&self, dn: &str) -> Result<String> {
        let ctx = self.context();
        let parsed = Dn::parse(dn)?;
        if !ctx.base().is_ancestor_of(&parsed) {
            return Err(GatewayError::OutsideBaseDn {
                bind_dn: dn.to_owned(),
                base_dn: ctx.base_dn.clone(),
            });
        }
        parsed
            .first_value("cn")
            .map(str::to_owned)
            .ok_or_else(|| GatewayError::MissingUsername(dn.to_owned()))
    }

    async fn bind(
        &self,
        username: &str,
        request: &BindRequest,
    ) -> Result<LdapResultCode>;

    async fn unbind(&self, request: &BindRequest) -> Result<LdapResultCode>;

    /// Prime the authentication flow.
    async fn warm_up(&self) {}

    /// Session cache to hand over to the next instance of this provider.
    fn session_cache(&self) -> Option<SessionCache> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::provider::tests::context;

    #[test]
    fn test_username() {
        let binder = DirectBinder::new(Arc::new(context("dc=ldap,dc=io")));

        assert_eq!(
            binder.username("CN=Alice,ou=users,DC=ldap,dc=io").unwrap(),
            "Alice"
        );
        assert_eq!(binder.username("cn=bob,dc=ldap,dc=io").unwrap(), "bob");
        assert!(matches!(
            binder.username("cn=alice,dc=other,dc=io"),
            Err(GatewayError::OutsideBaseDn { .. })
        ));
        assert!(matches!(
            binder.username("uid=alice,ou=users,dc=ldap,dc=io"),
            Err(GatewayError::MissingUsername(_))
        ));
        assert!(binder.username("dc=ldap,dc=io").is_err());
        assert!(binder.username("not a dn").is_err());
    }
}
