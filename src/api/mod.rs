//! Collaborators living on the other side of HTTP: the identity API, the
//! authentication flow executor and the certificate store.

pub mod certificate;
pub mod client;
pub mod flow;
pub mod model;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;
use model::{
    Certificate, Group, GroupQuery, ProviderConfig, Session, SessionUser, User,
    UserQuery,
};

pub use certificate::{ApiCertificateStore, CertificateStore};
pub use client::ApiClient;
pub use flow::HttpFlowExecutor;

/// Port for directory data.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Every LDAP provider assigned to this gateway.
    async fn providers(&self) -> Result<Vec<ProviderConfig>>;

    /// Every user matching `query`, with their groups.
    async fn users(&self, query: &UserQuery) -> Result<Vec<User>>;

    /// Every group matching `query`, with their members.
    async fn groups(&self, query: &GroupQuery) -> Result<Vec<Group>>;

    /// One user by primary key.
    async fn user(&self, pk: i32) -> Result<User>;

    /// Certificate and private key of a keypair.
    async fn certificate(&self, id: &str) -> Result<Certificate>;
}

/// Answers given to an authentication flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowAnswers {
    pub username: String,
    pub password: String,
    pub mfa_code: Option<String>,
    /// Address of the LDAP client, delegated to the flow.
    pub client_ip: Option<IpAddr>,
}

impl FlowAnswers {
    /// Build answers from bind credentials. With `mfa` enabled a trailing
    /// `;123456` is split off the password and used as the TOTP code.
    pub fn new(username: &str, password: &str, mfa: bool) -> Self {
        let mut answers = Self {
            username: username.to_owned(),
            password: password.to_owned(),
            ..Default::default()
        };

        if mfa {
            if let Some((password, code)) = password.rsplit_once(';') {
                if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
                    answers.password = password.to_owned();
                    answers.mfa_code = Some(code.to_owned());
                }
            }
        }

        answers
    }

    pub fn client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }
}

/// Result of running a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowOutcome {
    pub passed: bool,
    pub session: Option<Session>,
}

/// Port for the authentication flow executor.
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Run `flow` with the given answers.
    async fn execute(
        &self,
        flow: &str,
        answers: &FlowAnswers,
    ) -> Result<FlowOutcome>;

    /// Whether the session's user may access `app_slug` through `provider`.
    async fn check_access(
        &self,
        session: &Session,
        provider: i32,
        app_slug: &str,
    ) -> Result<bool>;

    /// The user a session belongs to.
    async fn session_user(&self, session: &Session) -> Result<SessionUser>;

    /// Run an invalidation flow for an existing session.
    async fn invalidate(
        &self,
        session: &Session,
        flow: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<()>;

    /// Prime the remote flow cache without authenticating anyone.
    async fn warm_up(&self, flow: &str) -> Result<()>;
}

/// Serve `router` on an ephemeral local port, returning its base URL.
#[cfg(test)]
pub(crate) async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{address}")
}
