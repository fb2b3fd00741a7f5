// ── Channel model ──
//
// A channel binds one resource of one appliance to a host-side id. The
// monitor produces `ChannelRecord`s for channels; the host consumes them
// through a `RecordSink`.

use chrono::{DateTime, Utc};
use homelink_api::{Resource, ValueKind};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use crate::error::CoreError;
use crate::value::TypedValue;

/// Separates resource name and appliance id in a channel address.
pub const ADDRESS_SEPARATOR: char = '@';

// ── ChannelConfig ────────────────────────────────────────────────────

/// Per-channel configuration supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub id: String,
    pub appliance_id: String,
    pub resource: &'static Resource,
}

impl ChannelConfig {
    pub fn new(
        id: impl Into<String>,
        appliance_id: impl Into<String>,
        resource: &'static Resource,
    ) -> Self {
        Self {
            id: id.into(),
            appliance_id: appliance_id.into(),
            resource,
        }
    }

    /// Parse a `RESOURCE@haId` address such as
    /// `FRIDGE_TEMPERATURE_SETPOINT@SIEMENS-KI36FP60-68A40E1A1C2B`.
    pub fn from_address(id: impl Into<String>, address: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidAddress {
            address: address.to_owned(),
            reason: reason.to_owned(),
        };

        let (name, appliance_id) = address
            .split_once(ADDRESS_SEPARATOR)
            .ok_or_else(|| invalid("expected RESOURCE@haId"))?;
        let (name, appliance_id) = (name.trim(), appliance_id.trim());
        if appliance_id.is_empty() {
            return Err(invalid("missing appliance id"));
        }

        let resource = Resource::by_name(name).ok_or_else(|| CoreError::UnknownResource {
            name: name.to_owned(),
        })?;
        Ok(Self::new(id, appliance_id, resource))
    }

    pub fn address(&self) -> String {
        format!("{}{ADDRESS_SEPARATOR}{}", self.resource.name, self.appliance_id)
    }

    pub fn is_string(&self) -> bool {
        self.resource.kind == ValueKind::String
    }

    /// Whether an event or reading with wire key `key` belongs to this channel.
    pub fn matches_key(&self, key: &str) -> bool {
        self.resource.key.eq_ignore_ascii_case(key)
    }
}

// ── ChannelFlag ──────────────────────────────────────────────────────

/// Quality flag attached to each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelFlag {
    Valid,
    /// The appliance does not support this resource/operation.
    AccessMethodNotSupported,
    /// Wrong scope or unknown appliance id.
    DriverErrorReadFailure,
    /// A value arrived but could not be converted to the channel's kind.
    DriverErrorDecoding,
    ConnectionException,
}

// ── ChannelRecord ────────────────────────────────────────────────────

/// One sample for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub value: Option<TypedValue>,
    pub timestamp: DateTime<Utc>,
    pub flag: ChannelFlag,
}

impl ChannelRecord {
    pub fn valid(
        channel_id: impl Into<String>,
        value: TypedValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            value: Some(value),
            timestamp,
            flag: ChannelFlag::Valid,
        }
    }

    /// A record without a value, carrying only `flag`.
    pub fn flagged(
        channel_id: impl Into<String>,
        flag: ChannelFlag,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            value: None,
            timestamp,
            flag,
        }
    }
}

// ── ConnectionHandle ─────────────────────────────────────────────────

/// Identifies one monitor instance towards the sink. A reconnect creates a
/// new monitor and therefore a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub appliance_id: String,
}

impl ConnectionHandle {
    pub fn new(appliance_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            appliance_id: appliance_id.into(),
        }
    }
}
