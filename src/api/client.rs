//! HTTP client for the identity API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::IdentityApi;
use super::model::{
    Certificate, Group, GroupQuery, Page, ProviderConfig, User, UserQuery,
};
use crate::constants::HEADER_LDAP_QUERY;
use crate::error::{GatewayError, Result};

const PAGE_SIZE: u32 = 100;
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const USER_AGENT: &str =
    concat!("ldap-gateway/", env!("CARGO_PKG_VERSION"));

/// Identity API client, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    pub(crate) base: Url,
    pub(crate) token: String,
    pub(crate) insecure: bool,
}

#[derive(Deserialize)]
struct PemData {
    data: String,
}

impl ApiClient {
    /// Create a new [`ApiClient`] for the API served under `base`.
    pub fn new(
        base: &str,
        token: impl Into<String>,
        insecure: bool,
    ) -> Result<Self> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            http,
            base,
            token: token.into(),
            insecure,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        ldap_filter: Option<&str>,
    ) -> Result<T> {
        let mut request = self
            .http
            .get(self.base.join(path)?)
            .bearer_auth(&self.token)
            .query(params);
        // header values must stay visible ASCII.
        if let Some(filter) = ldap_filter.filter(|f| {
            f.chars().all(|c| c.is_ascii_graphic() || c == ' ')
        }) {
            request = request.header(HEADER_LDAP_QUERY, filter);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%path, status = status.as_u16(), "API request failed");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                path: path.to_owned(),
            });
        }

        Ok(response.json().await?)
    }

    /// Follow `pagination.next` until the listing is exhausted.
    async fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        ldap_filter: Option<&str>,
    ) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let mut page = 1;
        loop {
            let mut query = params.to_vec();
            query.push(("page", page.to_string()));
            query.push(("page_size", PAGE_SIZE.to_string()));

            let response: Page<T> = self.get(path, &query, ldap_filter).await?;
            results.extend(response.results);

            let next = response.pagination.next;
            if next == 0 || next <= page {
                break;
            }
            page = next;
        }

        tracing::trace!(%path, count = results.len(), "fetched listing");
        Ok(results)
    }
}

#[async_trait]
impl IdentityApi for ApiClient {
    async fn providers(&self) -> Result<Vec<ProviderConfig>> {
        self.paginate("api/v3/outposts/ldap/", &[], None).await
    }

    async fn users(&self, query: &UserQuery) -> Result<Vec<User>> {
        self.paginate(
            "api/v3/core/users/",
            &query.params(),
            query.ldap_filter.as_deref(),
        )
        .await
    }

    async fn groups(&self, query: &GroupQuery) -> Result<Vec<Group>> {
        self.paginate(
            "api/v3/core/groups/",
            &query.params(),
            query.ldap_filter.as_deref(),
        )
        .await
    }

    async fn user(&self, pk: i32) -> Result<User> {
        self.get(&format!("api/v3/core/users/{pk}/"), &[], None)
            .await
    }

    async fn certificate(&self, id: &str) -> Result<Certificate> {
        let path = format!("api/v3/crypto/certificatekeypairs/{id}/");
        let certificate: PemData = self
            .get(&format!("{path}view_certificate/"), &[], None)
            .await?;
        let key: PemData = self
            .get(&format!("{path}view_private_key/"), &[], None)
            .await?;

        Ok(Certificate {
            id: id.to_owned(),
            certificate_pem: certificate.data,
            private_key_pem: key.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;
    use crate::api::serve_stub;

    /// Three pages of one user each, behind a bearer token.
    async fn users_page(
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> std::result::Result<Json<Value>, StatusCode> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if authorization != Some("Bearer token") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if query.get("page_size").map(String::as_str) != Some("100") {
            return Err(StatusCode::BAD_REQUEST);
        }

        let page: u32 = query
            .get("page")
            .and_then(|p| p.parse().ok())
            .ok_or(StatusCode::BAD_REQUEST)?;
        let next = if page < 3 { page + 1 } else { 0 };
        Ok(Json(json!({
            "pagination": { "next": next },
            "results": [{ "pk": page, "username": format!("user{page}") }],
        })))
    }

    async fn directory() -> String {
        let router =
            Router::new().route("/api/v3/core/users/", get(users_page));
        serve_stub(router).await
    }

    #[tokio::test]
    async fn test_paginate_follows_next() {
        let client = ApiClient::new(&directory().await, "token", false).unwrap();

        let users = client.users(&UserQuery::default()).await.unwrap();
        let usernames: Vec<_> =
            users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(usernames, ["user1", "user2", "user3"]);
        assert_eq!(users[2].pk, 3);
    }

    #[tokio::test]
    async fn test_error_status() {
        let client = ApiClient::new(&directory().await, "other", false).unwrap();

        let err = client.users(&UserQuery::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Api { status: 401, .. }));
    }

    #[test]
    fn test_base_url_keeps_prefix() {
        let client = ApiClient::new("https://auth.example.io/sso", "t", false)
            .unwrap();
        assert_eq!(
            client.base.join("api/v3/core/users/").unwrap().as_str(),
            "https://auth.example.io/sso/api/v3/core/users/"
        );

        let client = ApiClient::new("http://localhost:9000", "t", true).unwrap();
        assert_eq!(client.base.as_str(), "http://localhost:9000/");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", "t", false),
            Err(GatewayError::Url(_))
        ));
    }
}
