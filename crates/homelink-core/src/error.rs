// ── Core error types ──
//
// Errors surfaced by the connectivity engine. Wire-level failures from
// `homelink-api` are folded into engine outcomes by the `From` impl below;
// consumers never need to look at HTTP status codes.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Channel errors ───────────────────────────────────────────────
    #[error("Unknown channel: {channel_id}")]
    UnknownChannel { channel_id: String },

    #[error("Invalid channel address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unknown resource: {name}")]
    UnknownResource { name: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("HomeAppliance is offline: {message}")]
    ApplianceOffline { message: String },

    #[error("Too many requests in a given amount of time: {message}")]
    RateLimited { message: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Monitor for {appliance_id} is closed")]
    Closed { appliance_id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("Wrong scope or appliance id: {message}")]
    InvalidScopeOrId { message: String },

    #[error("Cannot decode {value:?} as {target}")]
    Decoding { value: String, target: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },
}

impl CoreError {
    /// Whether this error only affects a single channel.
    pub fn is_channel_level(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. } | Self::InvalidScopeOrId { .. } | Self::Decoding { .. }
        )
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<homelink_api::Error> for CoreError {
    fn from(err: homelink_api::Error) -> Self {
        use homelink_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::ApplianceOffline { body, .. } => CoreError::ApplianceOffline { message: body },
            Api::RateLimited { body, .. } => CoreError::RateLimited { message: body },
            ref e @ (Api::RateLimitTimeout { .. } | Api::Cancelled) => CoreError::RateLimited {
                message: e.to_string(),
            },
            Api::InvalidScopeOrId { body, .. } => CoreError::InvalidScopeOrId { message: body },
            Api::UnsupportedOperation(operation) => CoreError::Unsupported { operation },
            Api::Parse { value, target } => CoreError::Decoding {
                value,
                target: target.to_owned(),
            },
            ref e @ (Api::Transport(_) | Api::EventStream(_)) => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => CoreError::ConnectionFailed {
                reason: format!("Invalid URL: {e}"),
            },
            Api::Communication {
                status, message, ..
            } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::Deserialization { message, .. } => CoreError::Api {
                message: format!("Deserialization error: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_errors_map_to_engine_outcomes() {
        let offline: CoreError = homelink_api::Error::ApplianceOffline {
            status: 409,
            message: "Conflict".into(),
            body: "appliance offline".into(),
        }
        .into();
        assert!(matches!(offline, CoreError::ApplianceOffline { .. }));

        let unsupported: CoreError =
            homelink_api::Error::UnsupportedOperation("writing status".into()).into();
        assert!(unsupported.is_channel_level());

        let timeout: CoreError =
            homelink_api::Error::RateLimitTimeout { waited_ms: 150_000 }.into();
        assert!(matches!(timeout, CoreError::RateLimited { .. }));
        assert!(!timeout.is_channel_level());
    }
}
