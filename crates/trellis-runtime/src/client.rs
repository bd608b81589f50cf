use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FetchConfig;
use crate::error::RuntimeError;
use crate::state::StateManager;

/// When the configured bearer credential is attached to a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    /// Never.
    Omit,
    /// Only for requests to the origin of the configured base URL.
    #[default]
    SameOrigin,
    /// Always.
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the data client and the network.
///
/// A transport reports what the server said; deciding whether a status is a
/// failure is left to [`DataClient`].
pub trait HttpTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, RuntimeError>> + Send + 'a>>;
}

/// [`HttpTransport`] over `reqwest`.
pub struct ReqwestTransport {
    http: reqwest::Client,
    credentials: Credentials,
    origin: Option<Url>,
    bearer_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            origin: None,
            bearer_token: None,
        }
    }

    /// Credentials policy, origin and token taken from `config`.
    pub fn from_config(config: &FetchConfig) -> Self {
        let mut transport = Self::new(config.credentials);
        if let Some(base) = &config.base_url {
            match Url::parse(base) {
                Ok(url) => transport.origin = Some(url),
                Err(e) => tracing::warn!(base_url = %base, error = %e, "Ignoring unparsable base URL"),
            }
        }
        transport.bearer_token = config.resolved_bearer_token();
        transport
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn attaches_credentials(&self, url: &Url) -> bool {
        match self.credentials {
            Credentials::Omit => false,
            Credentials::Include => true,
            Credentials::SameOrigin => self
                .origin
                .as_ref()
                .is_some_and(|origin| origin.origin() == url.origin()),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, RuntimeError>> + Send + 'a>> {
        Box::pin(async move {
            let url = Url::parse(&request.url).map_err(|e| {
                RuntimeError::Transport(format!("invalid request URL {}: {e}", request.url))
            })?;

            let mut req = match request.method {
                Method::Get => self.http.get(url.clone()),
                Method::Post => self.http.post(url.clone()),
                Method::Put => self.http.put(url.clone()),
                Method::Patch => self.http.patch(url.clone()),
                Method::Delete => self.http.delete(url.clone()),
            };
            if let Some(body) = &request.body {
                req = req.json(body);
            }
            if let Some(token) = &self.bearer_token
                && self.attaches_credentials(&url)
            {
                req = req.bearer_auth(token);
            }

            let resp = req.send().await.map_err(|e| {
                RuntimeError::Transport(format!("{} {} failed: {e}", request.method, request.url))
            })?;
            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(|e| {
                RuntimeError::Transport(format!("failed to read response body: {e}"))
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Uniform outcome of a request. Network and HTTP failures land here
/// instead of being returned as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub data: Value,
    pub error: Option<String>,
}

impl FetchResult {
    fn failure(status: Option<u16>, data: Value, error: String) -> Self {
        Self {
            ok: false,
            status,
            data,
            error: Some(error),
        }
    }
}

/// HTTP convenience client bound to a component's state.
pub struct DataClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Option<String>,
    timeout: Duration,
    state: Option<StateManager>,
}

impl DataClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &FetchConfig) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
            state: None,
        }
    }

    /// Bind to `state` so [`fetch`](Self::fetch) can write results into it.
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Join a relative URL onto the base URL. Absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }

    /// GET `url`. On success the data is also stored under `state_key` when
    /// the client is bound to state.
    pub async fn fetch(&self, url: &str, state_key: Option<&str>) -> FetchResult {
        let result = self.send(Method::Get, url, None).await;
        if result.ok
            && let (Some(key), Some(state)) = (state_key, &self.state)
            && let Err(e) = state.set(key, result.data.clone())
        {
            tracing::warn!(key, error = %e, "Failed to store fetched data");
        }
        result
    }

    /// Send `body` as JSON with `method`.
    pub async fn submit(&self, url: &str, method: Method, body: &Value) -> FetchResult {
        self.send(method, url, Some(body.clone())).await
    }

    pub async fn delete(&self, url: &str) -> FetchResult {
        self.send(Method::Delete, url, None).await
    }

    async fn send(&self, method: Method, url: &str, body: Option<Value>) -> FetchResult {
        let request = HttpRequest {
            method,
            url: self.resolve_url(url),
            body,
        };
        tracing::debug!(method = %method, url = %request.url, "Sending request");

        let response = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(url = %request.url, error = %e, "Request failed");
                return FetchResult::failure(None, Value::Null, e.to_string());
            }
            Err(_) => {
                tracing::warn!(url = %request.url, timeout_ms = self.timeout.as_millis() as u64, "Request timed out");
                return FetchResult::failure(
                    None,
                    Value::Null,
                    format!("request timed out after {}ms", self.timeout.as_millis()),
                );
            }
        };

        let data = parse_body(&response.body);
        if (200..300).contains(&response.status) {
            FetchResult {
                ok: true,
                status: Some(response.status),
                data,
                error: None,
            }
        } else {
            FetchResult::failure(
                Some(response.status),
                data,
                format!("HTTP {}", response.status),
            )
        }
    }
}

fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
