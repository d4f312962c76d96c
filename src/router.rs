//! Dispatch of LDAP operations to the provider owning the DNs involved.

use std::net::IpAddr;
use std::sync::Arc;

use ldap3_proto::proto::{LdapFilter, LdapResultCode, LdapSearchScope};

use crate::api::model::Certificate;
use crate::bind::BindRequest;
use crate::constants::{OC_SUBSCHEMA, SUBSCHEMA_DN};
use crate::dn::{self, Dn};
use crate::entry::Entry;
use crate::error::{GatewayError, Result};
use crate::filter;
use crate::provider::ProviderInstance;
use crate::registry::Registry;
use crate::search::SearchRequest;
use crate::synthesis;
use crate::telemetry::{self, RequestKind};

/// Front door of the gateway, shared by every connection.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<Registry>,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// First provider able to read a username out of `dn`.
    fn provider_for_dn(
        &self,
        dn: &str,
    ) -> Option<(Arc<ProviderInstance>, String)> {
        self.registry.providers().iter().find_map(|provider| {
            provider
                .binder
                .username(dn)
                .ok()
                .map(|username| (provider.clone(), username))
        })
    }

    /// Provider with the most specific base DN containing either the search
    /// base or the bind DN.
    fn provider_for_search(
        &self,
        bind_dn: &str,
        base_dn: &str,
    ) -> Option<Arc<ProviderInstance>> {
        let base = Dn::parse(base_dn).ok();
        let bind = Dn::parse(bind_dn).ok();
        let owns = |provider: &ProviderInstance| {
            let root = provider.context.base();
            base.as_ref().is_some_and(|dn| root.contains(dn))
                || bind.as_ref().is_some_and(|dn| root.contains(dn))
        };

        let mut selected: Option<&Arc<ProviderInstance>> = None;
        let providers = self.registry.providers();
        for provider in providers.iter().filter(|p| owns(p)) {
            let deeper = selected.is_none_or(|s| {
                provider.context.base().len() > s.context.base().len()
            });
            if deeper {
                selected = Some(provider);
            }
        }
        selected.cloned()
    }

    pub async fn bind(
        &self,
        dn: &str,
        password: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<LdapResultCode> {
        let Some((provider, username)) = self.provider_for_dn(dn) else {
            tracing::info!(bind_dn = %dn, "no provider for bind DN");
            telemetry::record_rejection("no_provider", RequestKind::Bind, "");
            return Err(GatewayError::NoProvider);
        };

        let request = BindRequest {
            dn: dn.to_owned(),
            password: password.to_owned(),
            client_ip,
        };
        let app = provider.context.app_slug.as_str();
        telemetry::track(RequestKind::Bind, app, async {
            provider.binder.bind(&username, &request).await
        })
        .await
        .inspect_err(|err| {
            tracing::warn!(bind_dn = %dn, error = %err, "bind failed");
            telemetry::record_rejection(err.reason(), RequestKind::Bind, app);
        })
    }

    /// Run a search and narrow its entries to the client's filter and
    /// attribute list.
    pub async fn search(
        &self,
        bind_dn: &str,
        base_dn: &str,
        scope: LdapSearchScope,
        filter: LdapFilter,
        attributes: Vec<String>,
    ) -> Result<Vec<Entry>> {
        let Some(provider) = self.provider_for_search(bind_dn, base_dn) else {
            tracing::debug!(%bind_dn, %base_dn, "no provider for search, serving default root DSE");
            return Ok(vec![synthesis::unauthenticated_root_dse()]);
        };

        let request =
            SearchRequest::new(bind_dn, base_dn, scope, filter, attributes);
        let app = provider.context.app_slug.as_str();
        telemetry::track(RequestKind::Search, app, async {
            let searcher = &provider.searcher;
            let entries = if base_dn.trim().is_empty() {
                searcher.search_base(&request)?
            } else if dn::normalize(base_dn) == SUBSCHEMA_DN
                || request.filter_class.eq_ignore_ascii_case(OC_SUBSCHEMA)
            {
                searcher.search_subschema(&request)?
            } else {
                searcher.search(&request).await?
            };
            narrow(entries, &request)
        })
        .await
        .inspect_err(|err| {
            tracing::info!(
                %bind_dn,
                %base_dn,
                filter = %filter::render(&request.filter),
                reason = err.reason(),
                error = %err,
                "search rejected"
            );
            telemetry::record_rejection(err.reason(), RequestKind::Search, app);
        })
    }

    pub async fn unbind(
        &self,
        dn: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<LdapResultCode> {
        let Some((provider, _)) = self.provider_for_dn(dn) else {
            telemetry::record_rejection("no_provider", RequestKind::Unbind, "");
            return Err(GatewayError::NoProvider);
        };

        let request = BindRequest {
            dn: dn.to_owned(),
            client_ip,
            ..Default::default()
        };
        let app = provider.context.app_slug.as_str();
        telemetry::track(RequestKind::Unbind, app, async {
            provider.binder.unbind(&request).await
        })
        .await
    }

    /// A connection bound as `dn` went away. Its flags are dropped once the
    /// provider's eviction delay has passed.
    pub fn close(&self, dn: &str) {
        if dn.is_empty() {
            return;
        }
        if let Some((provider, _)) = self.provider_for_dn(dn) {
            let ctx = &provider.context;
            ctx.bound_users.evict_later(dn, ctx.eviction_delay);
        }
    }

    /// Keypair to present for a TLS handshake naming `server_name`.
    pub fn certificate(
        &self,
        server_name: Option<&str>,
    ) -> Option<Arc<Certificate>> {
        let providers = self.registry.providers();
        let with_certificate: Vec<_> = providers
            .iter()
            .filter(|p| p.context.certificate.is_some())
            .collect();

        let provider = match with_certificate.as_slice() {
            [only] => Some(*only),
            candidates => server_name.and_then(|name| {
                candidates.iter().copied().find(|p| {
                    p.context
                        .tls_server_name
                        .as_deref()
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            }),
        }?;

        let keypair = provider.context.certificate.as_deref()?;
        self.registry.certificates().get(keypair)
    }
}

fn narrow(entries: Vec<Entry>, request: &SearchRequest) -> Result<Vec<Entry>> {
    let mut narrowed = Vec::with_capacity(entries.len());
    for mut entry in entries {
        if filter::matches(&request.filter, &entry)? {
            entry.select(&request.attributes);
            narrowed.push(entry);
        }
    }
    Ok(narrowed)
}
