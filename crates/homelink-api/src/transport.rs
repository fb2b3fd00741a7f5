// Authenticated, throttled HTTP transport.
//
// Every call to the cloud API goes through `AuthenticatedTransport`: it
// takes a rate limiter permit for reads, attaches a fresh bearer token,
// records the attempt in a diagnostic log and classifies the response.
// Both the request client and the event stream share one instance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::{CredentialProvider, REFRESH_MARGIN};
use crate::diagnostics::{DiagnosticLog, RequestRecord, RequestSnapshot, ResponseSnapshot};
use crate::error::{Error, classify};
use crate::rate_limit::RateLimiter;

/// Media type of every JSON request and response.
pub const BSH_JSON_V1: &str = "application/vnd.bsh.sdk.v1+json";

/// Media type requested by the event stream.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Production API root.
pub const DEFAULT_API_URL: &str = "https://api.home-connect.com";

// ── TransportConfig ──────────────────────────────────────────────────

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Total timeout for ordinary requests.
    pub timeout: Duration,
    /// Idle read timeout of the event stream.
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy: Option<Url>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            proxy: None,
            user_agent: concat!("homelink/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build the client used for request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.builder()?.timeout(self.timeout).build().map_err(Error::Transport)
    }

    /// Build the client used for the event stream.
    ///
    /// No total timeout: the stream is long-lived. A read that stays idle
    /// for `read_timeout` fails the connection instead.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, Error> {
        self.builder()?
            .read_timeout(self.read_timeout)
            .build()
            .map_err(Error::Transport)
    }

    fn builder(&self) -> Result<reqwest::ClientBuilder, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent);
        if let Some(ref proxy) = self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str()).map_err(Error::Transport)?);
        }
        Ok(builder)
    }
}

// ── ApiRequest / ApiResponse ─────────────────────────────────────────

/// One logical API call: method, path, optional JSON body and the status
/// codes that count as success.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
    pub expected: Vec<u16>,
    pub appliance_id: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, None, 200)
    }

    pub fn put(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::PUT, path, Some(body.into()), 204)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, None, 204)
    }

    fn new(method: Method, path: impl Into<String>, body: Option<String>, expected: u16) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            expected: vec![expected],
            appliance_id: None,
        }
    }

    /// Replace the accepted status codes.
    pub fn expect(mut self, codes: &[u16]) -> Self {
        self.expected = codes.to_vec();
        self
    }

    pub fn for_appliance(mut self, ha_id: &str) -> Self {
        self.appliance_id = Some(ha_id.to_owned());
        self
    }
}

/// A response whose status was among the expected codes.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

// ── AuthenticatedTransport ───────────────────────────────────────────

/// HTTP transport that authenticates, throttles, records and classifies.
pub struct AuthenticatedTransport {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    identity: String,
    provider: Arc<dyn CredentialProvider>,
    limiter: Arc<RateLimiter>,
}

impl AuthenticatedTransport {
    pub fn new(
        base_url: Url,
        identity: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
        limiter: Arc<RateLimiter>,
        config: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
            stream_http: config.build_stream_client()?,
            base_url,
            identity: identity.into(),
            provider,
            limiter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// `Authorization` header value for the next request.
    ///
    /// Refreshes first when the token's lifetime is unknown or within the
    /// safety margin.
    pub async fn bearer(&self) -> Result<String, Error> {
        let mut credential = self.provider.valid_token(&self.identity).await?;
        if credential.needs_refresh(Utc::now(), REFRESH_MARGIN) {
            debug!(identity = %self.identity, "access token near expiry, refreshing");
            credential = self.provider.refresh(&credential).await?;
        }
        credential.bearer()
    }

    /// Force a refresh regardless of the token's remaining lifetime.
    pub async fn force_refresh(&self) -> Result<(), Error> {
        let credential = self.provider.valid_token(&self.identity).await?;
        self.provider.refresh(&credential).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// Send `request`, retrying once after a forced token refresh if the
    /// server rejects the token.
    ///
    /// Failures before dispatch (throttling, a failed proactive refresh)
    /// are returned as-is and never trigger the retry.
    pub async fn send(
        &self,
        request: &ApiRequest,
        log: &DiagnosticLog<RequestRecord>,
    ) -> Result<ApiResponse, Error> {
        let bearer = self.prepare(request).await?;
        match self.dispatch(request, bearer, log).await {
            Err(e) if e.is_auth_expired() => {
                debug!(path = %request.path, "token rejected, forcing refresh and retrying once");
                self.force_refresh().await?;
                let bearer = self.prepare(request).await?;
                self.dispatch(request, bearer, log).await
            }
            other => other,
        }
    }

    /// Take a limiter permit for reads and resolve the bearer token.
    async fn prepare(&self, request: &ApiRequest) -> Result<String, Error> {
        if request.method == Method::GET {
            self.limiter.acquire().await?;
        }
        self.bearer().await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: String,
        log: &DiagnosticLog<RequestRecord>,
    ) -> Result<ApiResponse, Error> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path)?)
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, BSH_JSON_V1);
        if let Some(ref body) = request.body {
            builder = builder.header(CONTENT_TYPE, BSH_JSON_V1).body(body.clone());
        }
        let http_request = builder.build().map_err(Error::Transport)?;
        let snapshot = RequestSnapshot::capture(&http_request);
        let appliance_id = request.appliance_id.as_deref();

        debug!("{} {}", request.method, snapshot.url);
        let response = match self.http.execute(http_request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, url = %snapshot.url, "request failed without response");
                record(log, appliance_id, snapshot, None);
                return Err(Error::Transport(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                record(
                    log,
                    appliance_id,
                    snapshot,
                    Some(ResponseSnapshot::new(status.as_u16(), &headers, "")),
                );
                return Err(Error::Transport(e));
            }
        };
        debug!(status = status.as_u16(), "{} {}", request.method, snapshot.url);
        trace!(body = %body, "response body");
        record(
            log,
            appliance_id,
            snapshot,
            Some(ResponseSnapshot::new(status.as_u16(), &headers, &body)),
        );

        check_status(status, &headers, &body, &request.expected)?;
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Open a server-sent event stream at `path`.
    ///
    /// Consumes a rate limiter permit and uses a fresh bearer token. The
    /// returned response has not been read yet.
    pub async fn open_stream(
        &self,
        path: &str,
        appliance_id: &str,
        cancel: &CancellationToken,
        log: &DiagnosticLog<RequestRecord>,
    ) -> Result<reqwest::Response, Error> {
        self.limiter.acquire_cancellable(cancel).await?;
        let bearer = self.bearer().await?;

        let http_request = self
            .stream_http
            .get(self.url(path)?)
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, EVENT_STREAM)
            .build()
            .map_err(Error::Transport)?;
        let snapshot = RequestSnapshot::capture(&http_request);

        debug!(appliance_id, url = %snapshot.url, "opening event stream");
        let response = match self.stream_http.execute(http_request).await {
            Ok(r) => r,
            Err(e) => {
                record(log, Some(appliance_id), snapshot, None);
                return Err(Error::Transport(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        if status == StatusCode::OK {
            record(
                log,
                Some(appliance_id),
                snapshot,
                Some(ResponseSnapshot::new(status.as_u16(), &headers, "")),
            );
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        record(
            log,
            Some(appliance_id),
            snapshot,
            Some(ResponseSnapshot::new(status.as_u16(), &headers, &body)),
        );
        Err(status_error(status, &headers, &body, false))
    }
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("base_url", &self.base_url.as_str())
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

fn check_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    expected: &[u16],
) -> Result<(), Error> {
    let code = status.as_u16();
    if expected.contains(&code) {
        return Ok(());
    }
    debug!(status = code, ?expected, "unexpected HTTP response code");
    Err(status_error(status, headers, body, expected.contains(&401)))
}

fn status_error(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    expected_unauthorized: bool,
) -> Error {
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    classify(
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body,
        retry_after,
        expected_unauthorized,
    )
}

fn record(
    log: &DiagnosticLog<RequestRecord>,
    appliance_id: Option<&str>,
    request: RequestSnapshot,
    response: Option<ResponseSnapshot>,
) {
    log.push(RequestRecord {
        timestamp: Utc::now(),
        appliance_id: appliance_id.map(str::to_owned),
        request,
        response,
    });
}
