//! Connectivity engine between `homelink-api` and a host framework.
//!
//! - **[`ApplianceMonitor`]**: Per-appliance state machine. Seeds every
//!   configured channel once, subscribes to the appliance's event stream,
//!   forwards events as typed records and tears the connection down when
//!   the keepalive watchdog sees too much silence.
//!
//! - **Channels** ([`ChannelConfig`], [`ChannelRecord`], [`ChannelFlag`]):
//!   Host-side bindings of one resource of one appliance, parsed from
//!   `RESOURCE@haId` addresses.
//!
//! - **Seams** ([`ApplianceApi`], [`EventSubscriber`], [`RecordSink`]):
//!   The monitor's collaborators. `ApplianceClient` and `EventStream`
//!   implement the first two; the host implements the sink.

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod monitor;
pub mod sink;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use api::{ApplianceApi, EventSubscriber};
pub use channel::{ChannelConfig, ChannelFlag, ChannelRecord, ConnectionHandle};
pub use config::MonitorConfig;
pub use error::CoreError;
pub use monitor::{ApplianceMonitor, MonitorState, OFFLINE_MARKER, RATE_LIMIT_MARKER};
pub use sink::RecordSink;
pub use value::TypedValue;
