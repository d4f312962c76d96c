//! Authentication flows driven over the flow executor endpoint.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::client::{ApiClient, REQUEST_TIMEOUT, USER_AGENT};
use super::model::{Session, SessionUser};
use super::{FlowAnswers, FlowExecutor, FlowOutcome};
use crate::constants::{HEADER_OUTPOST_TOKEN, HEADER_REMOTE_IP};
use crate::error::{GatewayError, Result};

const SESSION_COOKIE: &str = "authentik_session";
const OUTPOST_PARAM: &str = "goauthentik.io/outpost/ldap";
const WARMUP_PARAM: &str = "goauthentik.io/outpost/ldap-warmup";
/// Upper bound on challenges answered in one flow.
const MAX_STAGES: usize = 16;

const STAGE_IDENTIFICATION: &str = "ak-stage-identification";
const STAGE_PASSWORD: &str = "ak-stage-password";
const STAGE_AUTHENTICATOR_VALIDATE: &str = "ak-stage-authenticator-validate";
const STAGE_USER_LOGIN: &str = "ak-stage-user-login";
const STAGE_ACCESS_DENIED: &str = "ak-stage-access-denied";
const FLOW_REDIRECT: &str = "xak-flow-redirect";

/// Flow executor speaking the challenge/response protocol over HTTP.
///
/// Each execution gets its own cookie jar, so flows never share state.
#[derive(Debug, Clone)]
pub struct HttpFlowExecutor {
    base: Url,
    token: String,
    insecure: bool,
}

#[derive(Deserialize)]
struct AccessCheck {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    passing: bool,
}

#[derive(Deserialize)]
struct Me {
    user: SessionUser,
}

impl HttpFlowExecutor {
    /// Create a new [`HttpFlowExecutor`] against the same API as `client`.
    pub fn new(client: &ApiClient) -> Self {
        Self {
            base: client.base.clone(),
            token: client.token.clone(),
            insecure: client.insecure,
        }
    }

    fn http(&self, session: Option<&Session>) -> Result<reqwest::Client> {
        let jar = Arc::new(Jar::default());
        if let Some(session) = session {
            jar.add_cookie_str(
                &format!("{SESSION_COOKIE}={}", session.cookie),
                &self.base,
            );
        }

        Ok(reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(self.insecure)
            .build()?)
    }

    fn executor_url(&self, flow: &str, warm_up: bool) -> Result<Url> {
        let mut inner = url::form_urlencoded::Serializer::new(String::new());
        inner.append_pair(OUTPOST_PARAM, "true");
        if warm_up {
            inner.append_pair(WARMUP_PARAM, "true");
        }

        let mut url =
            self.base.join(&format!("api/v3/flows/executor/{flow}/"))?;
        url.query_pairs_mut().append_pair("query", &inner.finish());
        Ok(url)
    }

    /// Send one request, returning the challenge and the session cookie if
    /// the response set one.
    async fn send(
        &self,
        flow: &str,
        request: reqwest::RequestBuilder,
        client_ip: Option<IpAddr>,
    ) -> Result<(Value, Option<Session>)> {
        let mut request = request.header(HEADER_OUTPOST_TOKEN, &self.token);
        if let Some(ip) = client_ip {
            request = request.header(HEADER_REMOTE_IP, ip.to_string());
        }

        let response = request.send().await?;
        let session = response
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|cookie| Session {
                cookie: cookie.value().to_owned(),
                expires: cookie_expiry(cookie.max_age(), cookie.expires()),
            });

        if !response.status().is_success() {
            return Err(GatewayError::Flow {
                slug: flow.to_owned(),
                details: format!("executor returned {}", response.status()),
            });
        }

        Ok((response.json().await?, session))
    }

    /// Walk the flow's challenges until it redirects (passed) or denies.
    async fn run(
        &self,
        http: &reqwest::Client,
        flow: &str,
        answers: Option<&FlowAnswers>,
        client_ip: Option<IpAddr>,
    ) -> Result<FlowOutcome> {
        let url = self.executor_url(flow, false)?;
        let (mut challenge, mut session) =
            self.send(flow, http.get(url.clone()), client_ip).await?;

        for _ in 0..MAX_STAGES {
            if has_errors(&challenge) {
                tracing::debug!(%flow, "flow rejected the answers");
                return Ok(FlowOutcome {
                    passed: false,
                    session,
                });
            }

            let component = challenge
                .get("component")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            tracing::trace!(%flow, %component, "flow challenge");

            let response = match component.as_str() {
                FLOW_REDIRECT => {
                    return Ok(FlowOutcome {
                        passed: true,
                        session,
                    });
                },
                STAGE_ACCESS_DENIED => {
                    return Ok(FlowOutcome {
                        passed: false,
                        session,
                    });
                },
                STAGE_USER_LOGIN => {
                    json!({ "component": component, "remember_me": true })
                },
                stage => {
                    let Some(answers) = answers else {
                        return Err(GatewayError::Flow {
                            slug: flow.to_owned(),
                            details: format!("stage `{stage}` needs answers"),
                        });
                    };
                    match answer(stage, &challenge, answers) {
                        Some(response) => response,
                        None if stage == STAGE_AUTHENTICATOR_VALIDATE => {
                            tracing::debug!(%flow, "flow requires an MFA code");
                            return Ok(FlowOutcome {
                                passed: false,
                                session,
                            });
                        },
                        None => {
                            return Err(GatewayError::Flow {
                                slug: flow.to_owned(),
                                details: format!("unsupported stage `{stage}`"),
                            });
                        },
                    }
                },
            };

            let (next, cookie) = self
                .send(flow, http.post(url.clone()).json(&response), client_ip)
                .await?;
            challenge = next;
            session = cookie.or(session);
        }

        Err(GatewayError::Flow {
            slug: flow.to_owned(),
            details: "too many stages".into(),
        })
    }

    async fn get_with_session<T: serde::de::DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .http(Some(session))?
            .get(self.base.join(path)?)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                path: path.to_owned(),
            });
        }
        Ok(response.json().await?)
    }
}

fn has_errors(challenge: &Value) -> bool {
    challenge
        .get("response_errors")
        .and_then(Value::as_object)
        .is_some_and(|errors| !errors.is_empty())
}

/// Response to an interactive stage, `None` if it cannot be answered.
fn answer(
    stage: &str,
    challenge: &Value,
    answers: &FlowAnswers,
) -> Option<Value> {
    match stage {
        STAGE_IDENTIFICATION => {
            let mut response = json!({
                "component": stage,
                "uid_field": answers.username,
            });
            let password_fields =
                challenge.get("password_fields").and_then(Value::as_bool);
            if password_fields == Some(true) {
                response["password"] = json!(answers.password);
            }
            Some(response)
        },
        STAGE_PASSWORD => Some(json!({
            "component": stage,
            "password": answers.password,
        })),
        STAGE_AUTHENTICATOR_VALIDATE => answers.mfa_code.as_ref().map(|code| {
            json!({ "component": stage, "code": code })
        }),
        _ => None,
    }
}

fn cookie_expiry(
    max_age: Option<std::time::Duration>,
    expires: Option<std::time::SystemTime>,
) -> DateTime<Utc> {
    let now = Utc::now();
    max_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .map(|age| now + age)
        .or_else(|| expires.map(DateTime::<Utc>::from))
        .unwrap_or_else(|| now + chrono::Duration::hours(24))
}

#[async_trait]
impl FlowExecutor for HttpFlowExecutor {
    async fn execute(
        &self,
        flow: &str,
        answers: &FlowAnswers,
    ) -> Result<FlowOutcome> {
        let http = self.http(None)?;
        self.run(&http, flow, Some(answers), answers.client_ip).await
    }

    async fn check_access(
        &self,
        session: &Session,
        provider: i32,
        app_slug: &str,
    ) -> Result<bool> {
        let check: AccessCheck = self
            .get_with_session(
                session,
                &format!("api/v3/outposts/ldap/{provider}/check_access/"),
                &[("app_slug", app_slug)],
            )
            .await?;
        Ok(check.access.passing)
    }

    async fn session_user(&self, session: &Session) -> Result<SessionUser> {
        let me: Me = self
            .get_with_session(session, "api/v3/core/users/me/", &[])
            .await?;
        Ok(me.user)
    }

    async fn invalidate(
        &self,
        session: &Session,
        flow: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<()> {
        let http = self.http(Some(session))?;
        let outcome = self.run(&http, flow, None, client_ip).await?;
        if !outcome.passed {
            return Err(GatewayError::Flow {
                slug: flow.to_owned(),
                details: "invalidation was denied".into(),
            });
        }
        Ok(())
    }

    async fn warm_up(&self, flow: &str) -> Result<()> {
        let http = self.http(None)?;
        let url = self.executor_url(flow, true)?;
        self.send(flow, http.get(url), None).await.map(|_| ())
    }
}
