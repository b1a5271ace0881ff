//! Client for communicating with the control plane
//!
//! [`ApiClient`] is the transport seam: one form-encoded call in, the raw
//! payload out. [`Api`] layers the engine's call policy on top of it:
//! per-call-class timeouts, cooperative cancellation and JSON decoding.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use driftless_common::{ClientConfig, Error, PollConfig, Result, TimeoutConfig};

use crate::poller::TaskPoller;

/// HTTP method of a control plane call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Timeout class of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Reads and toggles
    Short,
    /// Creates, deletes and anything that moves data
    Long,
}

/// Ordered form parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Adds the field only when a value is present.
    pub fn with_opt(mut self, key: &str, value: Option<impl ToString>) -> Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transport seam to the control plane
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue one call. Transport retries, if any, happen in here; the engine
    /// treats every returned error as final for that call.
    async fn call(&self, method: Method, path: &str, params: &Params) -> Result<String>;
}

/// Client wrapper for the controller's REST API
pub struct HttpApiClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.allow_unverified_ssl)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/restmachine{}", self.endpoint, path)
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(&self, method: Method, path: &str, params: &Params) -> Result<String> {
        let request_id = Uuid::new_v4();
        debug!(%request_id, "{} {}", method, path);

        let url = self.url(path);
        let mut request = match method {
            Method::Get => self.http.get(&url).query(params.as_slice()),
            Method::Post => self.http.post(&url).form(params.as_slice()),
        };
        request = request.header("X-Request-Id", request_id.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::remote(path, e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::remote(path, e.to_string()))?;

        trace!(%request_id, status, "{} {} -> {}", method, path, body);
        classify_response(path, params, status, body)
    }
}

/// Map an HTTP status and body onto the error taxonomy.
pub(crate) fn classify_response(
    path: &str,
    params: &Params,
    status: u16,
    body: String,
) -> Result<String> {
    if (200..300).contains(&status) {
        return Ok(body);
    }
    if status == 404 || body.to_ascii_lowercase().contains("not found") {
        let id = params
            .as_slice()
            .first()
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        return Err(Error::NotFound {
            kind: path.to_string(),
            id,
        });
    }
    Err(Error::remote(path, format!("HTTP {}: {}", status, body.trim())))
}

/// Engine-side handle to the control plane
#[derive(Clone)]
pub struct Api {
    client: Arc<dyn ApiClient>,
    timeouts: TimeoutConfig,
    polling: PollConfig,
    cancel: CancellationToken,
}

impl Api {
    pub fn new(client: Arc<dyn ApiClient>, config: &ClientConfig) -> Self {
        Self {
            client,
            timeouts: config.timeouts,
            polling: config.polling,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind all calls and polls made through this handle to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn polling(&self) -> PollConfig {
        self.polling
    }

    pub fn poller(&self) -> TaskPoller<'_> {
        TaskPoller::new(self)
    }

    fn limit(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Short => self.timeouts.short(),
            CallClass::Long => self.timeouts.long(),
        }
    }

    async fn call(
        &self,
        method: Method,
        class: CallClass,
        path: &str,
        params: &Params,
    ) -> Result<String> {
        let limit = self.limit(class);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled {
                operation: path.to_string(),
            }),
            outcome = tokio::time::timeout(limit, self.client.call(method, path, params)) => {
                outcome.unwrap_or_else(|_| Err(Error::Timeout {
                    operation: path.to_string(),
                    seconds: limit.as_secs(),
                }))
            }
        }
    }

    /// Read call decoded from JSON
    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: Params) -> Result<T> {
        let body = self.call(Method::Get, CallClass::Short, path, &params).await?;
        serde_json::from_str(&body).map_err(|e| Error::decode(path, e))
    }

    /// Mutating call; the payload is returned undecoded
    pub async fn post(&self, class: CallClass, path: &str, params: Params) -> Result<String> {
        self.call(Method::Post, class, path, &params).await
    }

    /// Mutating call that answers with the id of a new object
    pub async fn post_id(&self, class: CallClass, path: &str, params: Params) -> Result<u64> {
        let body = self.post(class, path, params).await?;
        parse_id(path, &body)
    }

    /// Mutating call that answers with the audit id of an async task
    pub async fn post_task(&self, class: CallClass, path: &str, params: Params) -> Result<String> {
        let body = self.post(class, path, params).await?;
        let audit_id = serde_json::from_str::<String>(&body)
            .unwrap_or_else(|_| body.trim().to_string());
        if audit_id.is_empty() {
            return Err(Error::remote(path, "empty audit id in response"));
        }
        Ok(audit_id)
    }
}

pub(crate) fn parse_id(operation: &str, body: &str) -> Result<u64> {
    let value: serde_json::Value =
        serde_json::from_str(body.trim()).map_err(|e| Error::decode(operation, e))?;
    match &value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::remote(operation, format!("expected an id, got {}", body.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    struct SlowClient;

    #[async_trait]
    impl ApiClient for SlowClient {
        async fn call(&self, _method: Method, _path: &str, _params: &Params) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn test_classify_response() {
        let params = Params::new().with("computeId", 5);

        assert_eq!(
            classify_response("/cloudapi/compute/get", &params, 200, "{}".to_string()).unwrap(),
            "{}"
        );

        let err = classify_response("/cloudapi/compute/get", &params, 404, String::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "5"));

        let err = classify_response(
            "/cloudapi/compute/get",
            &params,
            500,
            "Compute with id 5 not found".to_string(),
        )
        .unwrap_err();
        assert!(err.is_not_found());

        let err = classify_response("/cloudapi/compute/start", &params, 500, "boom".to_string())
            .unwrap_err();
        assert!(matches!(err, Error::RemoteCall { ref message, .. } if message == "HTTP 500: boom"));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("create", "42").unwrap(), 42);
        assert_eq!(parse_id("create", "\"17\"\n").unwrap(), 17);
        assert!(matches!(parse_id("create", "true"), Err(Error::RemoteCall { .. })));
        assert!(matches!(parse_id("create", "<html>"), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_params_builder() {
        let params = Params::new()
            .with("computeId", 7)
            .with_opt("ipAddr", None::<String>)
            .with_opt("mac", Some("aa:bb"));
        assert_eq!(params.get("computeId"), Some("7"));
        assert_eq!(params.get("ipAddr"), None);
        assert_eq!(params.as_slice().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_call_times_out() {
        let api = Api::new(Arc::new(SlowClient), &ClientConfig::default());
        let err = api
            .post(CallClass::Short, "/cloudapi/compute/start", Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { seconds: 30, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_short_circuits() {
        let fake = Arc::new(FakeApi::new());
        let token = CancellationToken::new();
        let api = Api::new(fake.clone(), &ClientConfig::default()).with_cancellation(token.clone());

        token.cancel();
        let err = api
            .post(CallClass::Long, "/cloudapi/compute/delete", Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(fake.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_post_task_accepts_quoted_audit_id() {
        let fake = Arc::new(FakeApi::new());
        fake.ok("/cloudapi/k8s/create", "\"audit-1\"");
        let api = Api::new(fake, &ClientConfig::default());
        let audit = api
            .post_task(CallClass::Long, "/cloudapi/k8s/create", Params::new())
            .await
            .unwrap();
        assert_eq!(audit, "audit-1");
    }
}
