use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::{
    AdherenceSummary, DeviceOut, LoginRequest, LoginResponse, MeResponse, MedlogOut,
    MessageResponse, RegisterRequest, RegisterResponse, ScheduleOut, ScheduleRequest,
    ScheduleUpdate, TokenRegisterRequest, UserOut, UserUpdate,
};
use crate::notifications::Notification;
use crate::retry::{with_retry_when, RetryConfig};

pub const DEFAULT_BASE_URL: &str = "https://sap.protofylabs.web.id/";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for the medication backend
///
/// Cheap to clone; clones share the HTTP connection pool and the bearer token
/// slot, so a login through one handle authenticates all of them.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    token: Arc<RwLock<Option<String>>>,
    retry_config: RetryConfig,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(
            base_url,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            RetryConfig::default(),
        )
    }

    pub fn with_options(base_url: &str, timeout: Duration, retry_config: RetryConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(concat!("MedAlert/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
            token: Arc::new(RwLock::new(None)),
            retry_config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Install the bearer token sent with every subsequent request
    pub fn set_token(&self, token: Option<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = token.filter(|t| !t.is_empty());
    }

    pub fn has_token(&self) -> bool {
        self.current_token().is_some()
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Build a request with the Authorization header attached when we have a token
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(token) = self.current_token() {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Idempotent GET, retried on transient failures
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        with_retry_when(&self.retry_config, ApiError::is_transient, || async {
            let request = self.request(Method::GET, path)?.query(query);
            self.send_json(request).await
        })
        .await
    }

    /// Single-attempt call with a JSON body
    async fn call_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(method, path)?.json(body);
        self.send_json(request).await
    }

    // Auth

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.call_json(Method::POST, "register", request).await
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        self.call_json(Method::POST, "login", request).await
    }

    /// Who the current token belongs to; `ApiError::Unauthorized` when logged out
    pub async fn me(&self) -> Result<MeResponse> {
        self.get_json("me", &[]).await
    }

    // Users

    pub async fn get_user(&self, user_id: Uuid) -> Result<UserOut> {
        self.get_json(&format!("users/{}", user_id), &[]).await
    }

    pub async fn update_user(&self, user_id: Uuid, update: &UserUpdate) -> Result<UserOut> {
        self.call_json(Method::PUT, &format!("users/{}", user_id), update)
            .await
    }

    pub async fn adherence_summary(&self, user_id: Uuid) -> Result<AdherenceSummary> {
        self.get_json(&format!("users/{}/adherence-summary", user_id), &[])
            .await
    }

    // Devices

    pub async fn device_for_user(&self, user_id: Uuid) -> Result<DeviceOut> {
        self.get_json("devices", &[("user_id", user_id.to_string())])
            .await
    }

    // Schedules

    pub async fn schedules(&self, user_id: Uuid) -> Result<Vec<ScheduleOut>> {
        self.get_json(&format!("schedules/{}", user_id), &[]).await
    }

    pub async fn create_schedule(&self, user_id: Uuid, schedule: &ScheduleRequest) -> Result<ScheduleOut> {
        self.call_json(Method::POST, &format!("schedules/{}", user_id), schedule)
            .await
    }

    pub async fn update_schedule(&self, schedule_id: Uuid, update: &ScheduleUpdate) -> Result<ScheduleOut> {
        self.call_json(Method::PUT, &format!("schedules/{}", schedule_id), update)
            .await
    }

    pub async fn delete_schedule(&self, schedule_id: Uuid) -> Result<MessageResponse> {
        let request = self.request(Method::DELETE, &format!("schedules/{}", schedule_id))?;
        let body = self.send(request).await?;
        decode_message(&body)
    }

    // Medication logs

    pub async fn medlogs(&self, user_id: Uuid) -> Result<Vec<MedlogOut>> {
        self.get_json(&format!("medlogs/{}", user_id), &[]).await
    }

    // Notifications

    /// Latest notifications for a user, in the order the backend wants them shown
    ///
    /// Makes a single attempt. The background poller relies on its scheduler's
    /// backoff instead of retrying in-process.
    pub async fn latest_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let request = self.request(Method::GET, &format!("notifications/{}/latest", user_id))?;
        self.send_json(request).await
    }

    // Push tokens

    pub async fn register_token(&self, request: &TokenRegisterRequest) -> Result<MessageResponse> {
        let request = self.request(Method::POST, "register_token")?.json(request);
        let body = self.send(request).await?;
        decode_message(&body)
    }
}

/// Join-friendly base URL: `Url::join` drops the last segment unless it ends with '/'
fn normalize_base_url(base_url: &str) -> Result<Url> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };

    Url::parse(&with_slash).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))
}

/// Message endpoints sometimes answer 200/204 with an empty body
fn decode_message(body: &[u8]) -> Result<MessageResponse> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(MessageResponse::default());
    }
    Ok(serde_json::from_slice(body)?)
}
