// Appliance API client
//
// Wraps `AuthenticatedTransport` with Home Connect path construction, a
// bounded request log and the program-options cache. Endpoint groups
// (settings, programs, appliances, resource dispatch) are implemented as
// inherent methods in separate files to keep this module focused on
// transport mechanics.

use std::sync::Arc;

use dashmap::DashMap;
use url::Url;

use crate::auth::CredentialProvider;
use crate::diagnostics::{DiagnosticLog, REQUEST_LOG_CAPACITY, RequestRecord};
use crate::error::Error;
use crate::models::ProgramOption;
use crate::rate_limit::RateLimiter;
use crate::transport::{ApiRequest, ApiResponse, AuthenticatedTransport, TransportConfig};

/// High-level client for one user's appliances.
///
/// Every call is recorded in a request log of [`REQUEST_LOG_CAPACITY`]
/// entries, including calls that fail. Program options are cached per
/// program key for the lifetime of the client.
pub struct ApplianceClient {
    transport: Arc<AuthenticatedTransport>,
    requests: DiagnosticLog<RequestRecord>,
    pub(crate) option_cache: DashMap<String, Vec<ProgramOption>>,
}

impl ApplianceClient {
    pub fn new(transport: Arc<AuthenticatedTransport>) -> Self {
        Self::with_history(transport, Vec::new())
    }

    /// Create a client whose request log starts with earlier history.
    pub fn with_history(
        transport: Arc<AuthenticatedTransport>,
        history: impl IntoIterator<Item = Arc<RequestRecord>>,
    ) -> Self {
        Self {
            transport,
            requests: DiagnosticLog::with_history(REQUEST_LOG_CAPACITY, history),
            option_cache: DashMap::new(),
        }
    }

    /// Build the transport and the client in one step.
    pub fn connect(
        base_url: Url,
        identity: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
        limiter: Arc<RateLimiter>,
        config: &TransportConfig,
    ) -> Result<Self, Error> {
        let transport = AuthenticatedTransport::new(base_url, identity, provider, limiter, config)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn transport(&self) -> &Arc<AuthenticatedTransport> {
        &self.transport
    }

    /// Latest requests, oldest first.
    pub fn latest_requests(&self) -> Vec<Arc<RequestRecord>> {
        self.requests.snapshot()
    }

    // ── Path builders ────────────────────────────────────────────────

    /// `/api/homeappliances/{haId}/{suffix}`
    pub(crate) fn appliance_path(ha_id: &str, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("/api/homeappliances/{ha_id}")
        } else {
            format!("/api/homeappliances/{ha_id}/{suffix}")
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        self.transport.send(&request, &self.requests).await
    }

    /// PUT `{"data": <payload>}` to `path`, expecting 204.
    pub(crate) async fn put_data(
        &self,
        ha_id: &str,
        path: String,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        let body = serde_json::json!({ "data": payload }).to_string();
        self.send(ApiRequest::put(path, body).for_appliance(ha_id))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ApplianceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplianceClient")
            .field("transport", &self.transport)
            .field("requests", &self.requests.len())
            .field("cached_programs", &self.option_cache.len())
            .finish()
    }
}
