use thiserror::Error;

/// Top-level error type for the `homelink-api` crate.
///
/// HTTP failures are classified exactly once, in [`classify`], so callers
/// match on variants instead of inspecting message text.
/// `homelink-core` maps these into connection- and channel-level outcomes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Missing, invalid or expired bearer token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server-sent event stream could not be opened.
    #[error("Event stream failed: {0}")]
    EventStream(String),

    // ── Rate limiting ───────────────────────────────────────────────
    /// The cloud API answered 429.
    #[error("Rate limited (HTTP 429) -- retry after {}", retry_hint(*.retry_after_secs))]
    RateLimited {
        retry_after_secs: Option<u64>,
        body: String,
    },

    /// The local request throttle could not hand out a permit in time.
    #[error("Rate limiter wait exceeded {waited_ms}ms")]
    RateLimitTimeout { waited_ms: u64 },

    /// The wait for a rate limiter permit was cancelled.
    #[error("Rate limiter wait cancelled")]
    Cancelled,

    // ── Classified API responses ────────────────────────────────────
    /// The appliance is not reachable by the cloud (409 with an offline marker).
    #[error("HomeAppliance is offline (HTTP {status}): {body}")]
    ApplianceOffline {
        status: u16,
        message: String,
        body: String,
    },

    /// Wrong OAuth scope or unknown appliance id.
    #[error("Invalid scope or appliance id (HTTP {status}): {body}")]
    InvalidScopeOrId {
        status: u16,
        message: String,
        body: String,
    },

    /// The resource/operation combination is not valid for this appliance.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Any other unexpected status code.
    #[error("Communication error (HTTP {status} {message}): {body}")]
    Communication {
        status: u16,
        message: String,
        body: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON response body did not have the expected shape.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A present wire value could not be converted to the requested type.
    #[error("Cannot parse {value:?} as {target}")]
    Parse { value: String, target: &'static str },
}

fn retry_hint(secs: Option<u64>) -> String {
    secs.map_or_else(|| "an unspecified delay".into(), |s| format!("{s}s"))
}

impl Error {
    /// Returns `true` if this error indicates the token was rejected
    /// and a forced refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::RateLimited { .. } | Self::RateLimitTimeout { .. } | Self::EventStream(_) => {
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if this error concerns the whole connection rather
    /// than a single resource.
    pub fn is_connection_level(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedOperation(_) | Self::InvalidScopeOrId { .. } | Self::Parse { .. }
        )
    }

    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::RateLimited { .. } => Some(429),
            Self::ApplianceOffline { status, .. }
            | Self::InvalidScopeOrId { status, .. }
            | Self::Communication { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Classify a completed response whose status was not among the expected codes.
///
/// `expected_unauthorized` suppresses the 401 → [`Error::Authentication`] rule
/// for calls that list 401 as an acceptable outcome.
pub(crate) fn classify(
    status: u16,
    reason: &str,
    body: &str,
    retry_after_secs: Option<u64>,
    expected_unauthorized: bool,
) -> Error {
    let lower = body.to_lowercase();
    match status {
        401 if !expected_unauthorized => Error::Authentication {
            message: "Token invalid!".into(),
        },
        409 if lower.contains("error") && lower.contains("offline") => Error::ApplianceOffline {
            status,
            message: reason.to_owned(),
            body: body.to_owned(),
        },
        429 => Error::RateLimited {
            retry_after_secs,
            body: body.to_owned(),
        },
        403 => Error::InvalidScopeOrId {
            status,
            message: reason.to_owned(),
            body: body.to_owned(),
        },
        404 if lower.contains("unsupported") => {
            Error::UnsupportedOperation(format!("HTTP 404: {body}"))
        }
        404 => Error::InvalidScopeOrId {
            status,
            message: reason.to_owned(),
            body: body.to_owned(),
        },
        _ => Error::Communication {
            status,
            message: reason.to_owned(),
            body: body.to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_with_offline_marker_is_appliance_offline() {
        let err = classify(409, "Conflict", r#"{"error":"appliance offline"}"#, None, false);
        assert!(matches!(err, Error::ApplianceOffline { status: 409, .. }));
    }

    #[test]
    fn offline_marker_is_case_insensitive() {
        let body = r#"{"ERROR":{"key":"SDK.Error.HomeAppliance.Connection.Initialization.Failed","description":"HomeAppliance is OFFLINE"}}"#;
        assert!(matches!(
            classify(409, "Conflict", body, None, false),
            Error::ApplianceOffline { .. }
        ));
    }

    #[test]
    fn conflict_without_offline_marker_is_communication() {
        let err = classify(409, "Conflict", r#"{"error":"program locked"}"#, None, false);
        assert!(matches!(err, Error::Communication { status: 409, .. }));
    }

    #[test]
    fn unauthorized_is_auth_unless_expected() {
        assert!(classify(401, "", "", None, false).is_auth_expired());
        assert!(matches!(
            classify(401, "Unauthorized", "", None, true),
            Error::Communication { status: 401, .. }
        ));
    }

    #[test]
    fn too_many_requests_carries_retry_after() {
        let err = classify(429, "Too Many Requests", "", Some(12), false);
        assert!(matches!(
            err,
            Error::RateLimited {
                retry_after_secs: Some(12),
                ..
            }
        ));
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn not_found_splits_on_unsupported_marker() {
        let unsupported = classify(
            404,
            "Not Found",
            r#"{"error":{"key":"SDK.Error.UnsupportedSetting"}}"#,
            None,
            false,
        );
        assert!(matches!(unsupported, Error::UnsupportedOperation(_)));
        assert!(!unsupported.is_connection_level());

        let unknown = classify(404, "Not Found", r#"{"error":{"key":"404"}}"#, None, false);
        assert!(matches!(unknown, Error::InvalidScopeOrId { .. }));
    }

    #[test]
    fn forbidden_is_scope_error() {
        let err = classify(403, "Forbidden", "insufficient_scope", None, false);
        assert!(matches!(err, Error::InvalidScopeOrId { status: 403, .. }));
        assert!(!err.is_connection_level());
    }
}
