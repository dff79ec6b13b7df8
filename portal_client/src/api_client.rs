//! HTTP client for the portal auth API.

use async_trait::async_trait;
use portal_auth::{
    auth::{RefreshResult, UserId, UserProfile},
    session::PurgeCounts,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    cookies::CookieJar,
    error::{ClientError, ClientResult},
};

/// Successful `/auth/login` answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub user: UserProfile,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Body posted to `/auth/emergency-cleanup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupNotice {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// The server calls the client runtime depends on.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, email: &str, password: &str, remember_me: bool)
    -> ClientResult<LoginResponse>;

    async fn refresh(&self, refresh_token: &str) -> ClientResult<RefreshResult>;

    async fn logout(&self, session_id: Option<Uuid>, refresh_token: Option<&str>)
    -> ClientResult<()>;

    /// `access_token`, when given, is sent as the Bearer credential.
    async fn notify_cleanup(
        &self,
        notice: &CleanupNotice,
        access_token: Option<&str>,
    ) -> ClientResult<PurgeCounts>;

    async fn health(&self) -> ClientResult<bool>;
}

/// [`AuthBackend`] over reqwest.
pub struct HttpAuthBackend {
    base_url: String,
    client: reqwest::Client,
    jar: Option<Arc<CookieJar>>,
    cookie_domain: String,
}

impl HttpAuthBackend {
    /// Every request is bounded by `timeout`; exceeding it is `BackendUnreachable`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::BackendUnreachable(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let cookie_domain = reqwest::Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        Ok(Self {
            base_url,
            client,
            jar: None,
            cookie_domain,
        })
    }

    /// Mirror `Set-Cookie` headers from every response into `jar`.
    pub fn with_cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ClientResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> ClientResult<T> {
        if let Some(jar) = &self.jar {
            for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
                if let Ok(header) = value.to_str() {
                    jar.apply_set_cookie(header, &self.cookie_domain);
                }
            }
        }

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let envelope: Option<ErrorEnvelope> = serde_json::from_slice(&bytes).ok();
        if status.is_server_error() {
            return Err(ClientError::BackendUnreachable(match envelope {
                Some(e) if !e.message.is_empty() => e.message,
                _ => format!("server answered {status}"),
            }));
        }
        Err(match envelope {
            Some(e) if !e.code.is_empty() => ClientError::from_code(&e.code, e.message),
            _ => ClientError::Rejected {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            },
        })
    }
}

fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::BackendUnreachable("request timed out".to_string())
    } else {
        ClientError::BackendUnreachable(err.to_string())
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> ClientResult<LoginResponse> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::MissingCredentials);
        }
        self.post(
            "/auth/login",
            &LoginRequest {
                email,
                password,
                remember_me,
            },
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<RefreshResult> {
        self.post("/auth/refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn logout(
        &self,
        session_id: Option<Uuid>,
        refresh_token: Option<&str>,
    ) -> ClientResult<()> {
        let _: serde_json::Value = self
            .post(
                "/auth/logout",
                &LogoutRequest {
                    session_id,
                    refresh_token,
                },
            )
            .await?;
        Ok(())
    }

    async fn notify_cleanup(
        &self,
        notice: &CleanupNotice,
        access_token: Option<&str>,
    ) -> ClientResult<PurgeCounts> {
        let mut request = self
            .client
            .post(self.url("/auth/emergency-cleanup"))
            .json(notice);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }

    async fn health(&self) -> ClientResult<bool> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }
}
