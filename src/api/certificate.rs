//! Keypairs served to TLS clients, fetched from the identity API on every
//! refresh and kept in memory.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::IdentityApi;
use super::model::Certificate;
use crate::error::Result;

/// Port for TLS keypairs.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// A keypair already fetched.
    fn get(&self, id: &str) -> Option<Arc<Certificate>>;

    /// Fetch a keypair and keep it for later [`CertificateStore::get`],
    /// replacing any earlier copy.
    async fn add_keypair(&self, id: &str) -> Result<()>;
}

/// [`CertificateStore`] backed by the identity API.
pub struct ApiCertificateStore {
    api: Arc<dyn IdentityApi>,
    certificates: RwLock<HashMap<String, Arc<Certificate>>>,
}

impl ApiCertificateStore {
    pub fn new(api: Arc<dyn IdentityApi>) -> Self {
        Self {
            api,
            certificates: RwLock::default(),
        }
    }
}

#[async_trait]
impl CertificateStore for ApiCertificateStore {
    fn get(&self, id: &str) -> Option<Arc<Certificate>> {
        self.certificates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    async fn add_keypair(&self, id: &str) -> Result<()> {
        let certificate = match self.api.certificate(id).await {
            Ok(certificate) => certificate,
            // keep serving the copy we have.
            Err(err) if self.get(id).is_some() => {
                tracing::warn!(keypair = %id, error = %err, "failed to refresh certificate");
                return Ok(());
            },
            Err(err) => return Err(err),
        };

        let mut certificates = self
            .certificates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match certificates.get(id) {
            Some(current) if **current == certificate => {},
            Some(_) => {
                tracing::info!(keypair = %id, "certificate rotated");
                certificates.insert(id.to_owned(), Arc::new(certificate));
            },
            None => {
                tracing::debug!(keypair = %id, "fetched certificate");
                certificates.insert(id.to_owned(), Arc::new(certificate));
            },
        }
        Ok(())
    }
}
