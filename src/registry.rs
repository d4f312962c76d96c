//! Set of providers currently served, rebuilt from the identity API on
//! every refresh.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::api::model::{AccessMode, ProviderConfig};
use crate::api::{CertificateStore, FlowExecutor, IdentityApi};
use crate::bind::{Binder, DirectBinder, SessionBinder};
use crate::error::{GatewayError, Result};
use crate::provider::{ProviderContext, ProviderInstance};
use crate::search::{DirectSearcher, MemorySearcher, Searcher};
use crate::telemetry;

pub type Providers = Arc<Vec<Arc<ProviderInstance>>>;

pub struct Registry {
    providers: RwLock<Providers>,
    api: Arc<dyn IdentityApi>,
    flows: Arc<dyn FlowExecutor>,
    certificates: Arc<dyn CertificateStore>,
    eviction_delay: Duration,
}

impl Registry {
    /// Create an empty registry. Nothing is served until the first
    /// successful [`Registry::refresh`].
    pub fn new(
        api: Arc<dyn IdentityApi>,
        flows: Arc<dyn FlowExecutor>,
        certificates: Arc<dyn CertificateStore>,
        eviction_delay: Duration,
    ) -> Self {
        Self {
            providers: RwLock::default(),
            api,
            flows,
            certificates,
            eviction_delay,
        }
    }

    /// Snapshot of the providers, in the order the API returned them.
    pub fn providers(&self) -> Providers {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn certificates(&self) -> &dyn CertificateStore {
        self.certificates.as_ref()
    }

    /// Fetch every provider and swap them in at once.
    ///
    /// On error the previous providers stay in place.
    pub async fn refresh(&self) -> Result<usize> {
        let configs = self.api.providers().await?;
        if configs.is_empty() {
            return Err(GatewayError::NoProvidersConfigured);
        }

        let previous = self.providers();
        let mut providers = Vec::with_capacity(configs.len());
        for config in &configs {
            let old = previous.iter().find(|p| p.context.id == config.pk);
            match self.build(config, old.map(Arc::as_ref)).await {
                Ok(instance) => providers.push(Arc::new(instance)),
                Err(
                    err @ (GatewayError::Dn(_) | GatewayError::Internal { .. }),
                ) => {
                    tracing::error!(
                        provider = %config.name,
                        base_dn = %config.base_dn,
                        error = %err,
                        "invalid base DN, skipping provider"
                    );
                },
                Err(err) => return Err(err),
            }
        }
        if providers.is_empty() {
            return Err(GatewayError::NoProvidersConfigured);
        }

        let count = providers.len();
        *self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(providers);

        telemetry::record_providers(count);
        tracing::info!(providers = count, "refreshed providers");
        Ok(count)
    }

    async fn build(
        &self,
        config: &ProviderConfig,
        old: Option<&ProviderInstance>,
    ) -> Result<ProviderInstance> {
        let bound_users = old
            .map(|p| p.context.bound_users.clone())
            .unwrap_or_default();

        if let Some(keypair) = &config.certificate {
            if let Err(err) = self.certificates.add_keypair(keypair).await {
                tracing::warn!(
                    provider = %config.name,
                    keypair = %keypair,
                    error = %err,
                    "failed to fetch certificate"
                );
            }
        }

        let context = Arc::new(ProviderContext::new(
            config,
            bound_users,
            self.api.clone(),
            self.flows.clone(),
            self.eviction_delay,
        )?);

        let binder: Box<dyn Binder> = match config.bind_mode {
            AccessMode::Direct => Box::new(DirectBinder::new(context.clone())),
            AccessMode::Cached => Box::new(SessionBinder::new(
                context.clone(),
                old.and_then(|p| p.binder.session_cache()),
            )),
        };
        let searcher: Box<dyn Searcher> = match config.search_mode {
            AccessMode::Direct => {
                Box::new(DirectSearcher::new(context.clone()))
            },
            AccessMode::Cached => {
                Box::new(MemorySearcher::load(context.clone()).await?)
            },
        };

        tracing::debug!(
            provider = %config.name,
            base_dn = %context.base_dn,
            bind_mode = ?config.bind_mode,
            search_mode = ?config.search_mode,
            "built provider"
        );
        Ok(ProviderInstance {
            context,
            binder,
            searcher,
        })
    }

    /// Prime the authentication flow of every provider.
    pub async fn warm_up(&self) {
        for provider in self.providers().iter() {
            provider.binder.warm_up().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiCertificateStore;
    use crate::bind::BindRequest;
    use crate::testing::{self, MemoryApi, MemoryFlows};

    fn registry(api: Arc<MemoryApi>, flows: Arc<MemoryFlows>) -> Registry {
        Registry::new(
            api.clone(),
            flows,
            Arc::new(ApiCertificateStore::new(api)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_refresh_without_providers() {
        let api = Arc::new(
            MemoryApi::default()
                .with_provider(testing::provider(1, "ldap", "dc=ldap,dc=io")),
        );
        let registry = registry(api.clone(), Arc::default());
        assert_eq!(registry.refresh().await.unwrap(), 1);

        api.set_providers(Vec::new());
        let err = registry.refresh().await.unwrap_err();
        assert!(err.to_string().contains("no provider"));
        assert_eq!(registry.providers().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_providers() {
        let api = Arc::new(
            MemoryApi::default()
                .with_provider(testing::provider(1, "ldap", "dc=ldap,dc=io")),
        );
        let registry = registry(api.clone(), Arc::default());
        registry.refresh().await.unwrap();

        api.set_failing(true);
        assert!(registry.refresh().await.is_err());
        assert_eq!(registry.providers()[0].context.name, "ldap");
    }

    #[tokio::test]
    async fn test_refresh_skips_invalid_base_dn() {
        let api = Arc::new(
            MemoryApi::default()
                .with_provider(testing::provider(1, "broken", "not a dn"))
                .with_provider(testing::provider(2, "ldap", "dc=ldap,dc=io")),
        );
        let registry = registry(api, Arc::default());
        assert_eq!(registry.refresh().await.unwrap(), 1);
        assert_eq!(registry.providers()[0].context.name, "ldap");
    }

    #[tokio::test]
    async fn test_refresh_carries_state_over() {
        let alice = testing::user(1, "alice", &[]);
        let mut config = testing::provider(1, "ldap", "dc=ldap,dc=io");
        config.bind_mode = AccessMode::Cached;
        let api = Arc::new(MemoryApi::default().with_provider(config.clone()));
        let flows = Arc::new(MemoryFlows::default().with_user(&alice, "secret"));
        let registry = registry(api.clone(), flows.clone());
        registry.refresh().await.unwrap();

        let request = BindRequest {
            dn: "cn=alice,ou=users,dc=ldap,dc=io".into(),
            password: "secret".into(),
            client_ip: None,
        };
        let provider = registry.providers()[0].clone();
        provider.binder.bind("alice", &request).await.unwrap();

        config.name = "renamed".into();
        api.set_providers(vec![config]);
        registry.refresh().await.unwrap();

        let provider = registry.providers()[0].clone();
        assert_eq!(provider.context.name, "renamed");
        assert!(provider.context.bound_users.get(&request.dn).await.is_some());
        provider.binder.bind("alice", &request).await.unwrap();
        assert_eq!(flows.calls("execute"), 1);
    }

    #[tokio::test]
    async fn test_refresh_loads_snapshot_and_certificate() {
        let mut config = testing::provider(1, "ldap", "dc=ldap,dc=io");
        config.search_mode = AccessMode::Cached;
        config.certificate = Some("kp-1".into());
        let api = Arc::new(
            MemoryApi::default()
                .with_provider(config)
                .with_user(testing::user(1, "alice", &[]))
                .with_certificate("kp-1"),
        );
        let registry = registry(api.clone(), Arc::default());
        registry.refresh().await.unwrap();

        assert_eq!(api.calls("users"), 1);
        assert_eq!(api.calls("groups"), 1);
        assert!(registry.certificates().get("kp-1").is_some());
    }

    #[tokio::test]
    async fn test_missing_certificate_is_not_fatal() {
        let mut config = testing::provider(1, "ldap", "dc=ldap,dc=io");
        config.certificate = Some("missing".into());
        let api = Arc::new(MemoryApi::default().with_provider(config));
        let registry = registry(api, Arc::default());
        assert_eq!(registry.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_warm_up() {
        let api = Arc::new(
            MemoryApi::default()
                .with_provider(testing::provider(1, "a", "dc=a,dc=io"))
                .with_provider(testing::provider(2, "b", "dc=b,dc=io")),
        );
        let flows = Arc::new(MemoryFlows::default());
        let registry = registry(api, flows.clone());
        registry.refresh().await.unwrap();

        registry.warm_up().await;
        assert_eq!(flows.calls("warm_up"), 2);
    }
}
