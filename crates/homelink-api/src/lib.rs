// homelink-api: Async Rust client for the Home Connect appliance cloud API (REST + SSE)

pub mod access;
pub mod appliances;
pub mod auth;
pub mod client;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod models;
pub mod programs;
pub mod rate_limit;
pub mod resource;
pub mod settings;
pub mod sse;
pub mod transport;

pub use auth::{Credential, CredentialProvider, StaticTokenProvider};
pub use client::ApplianceClient;
pub use diagnostics::{DiagnosticLog, RequestRecord};
pub use error::Error;
pub use events::{
    EventKind, EventListener, EventRecord, EventStream, ReconnectConfig, SubscriptionHandle,
};
pub use models::{AvailableProgram, HomeAppliance, Program, ProgramOption, Value};
pub use programs::ProgramTarget;
pub use rate_limit::{BucketConfig, RateLimitConfig, RateLimiter};
pub use resource::{Resource, ResourceCategory, ValueKind};
pub use transport::{AuthenticatedTransport, TransportConfig};
