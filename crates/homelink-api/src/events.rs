//! Appliance event stream with auto-reconnect.
//!
//! Each `(appliance, listener)` pair gets one long-lived server-sent event
//! connection running in a background task. Transport drops are retried
//! with exponential backoff + jitter without the listener noticing; every
//! received event is appended to a bounded log before it is delivered.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use homelink_api::{EventStream, EventListener, EventRecord, ReconnectConfig};
//!
//! struct Printer;
//! impl EventListener for Printer {
//!     fn on_event(&self, event: &EventRecord) {
//!         println!("{} {} = {:?}", event.kind, event.key, event.value);
//!     }
//! }
//!
//! let stream = EventStream::new(transport, ReconnectConfig::default());
//! let handle = stream.subscribe("BOSCH-WAT286H0GB-68A40E251CB2", Arc::new(Printer));
//! // ...
//! stream.unsubscribe(&handle);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::diagnostics::{DiagnosticLog, EVENT_LOG_CAPACITY, REQUEST_LOG_CAPACITY, RequestRecord};
use crate::error::Error;
use crate::models::Value;
use crate::rate_limit::duration_secs;
use crate::sse::{SseDecoder, parse_frame};
use crate::transport::AuthenticatedTransport;

// ── EventRecord ──────────────────────────────────────────────────────

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The appliance (re)connected to the cloud.
    Connected,
    /// The appliance lost its cloud connection.
    Disconnected,
    /// Periodic no-op proving the stream is alive.
    KeepAlive,
    /// A program option or other non-setting value changed.
    Notify,
    StatusChange,
    SettingChange,
    /// A discrete appliance event, e.g. a full drip tray.
    ApplianceEvent,
}

/// One event as received from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub appliance_id: String,
    pub kind: EventKind,
    pub key: String,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// The `{key, value, unit}` triple carried by this event.
    pub fn to_value(&self) -> Value {
        Value {
            key: self.key.clone(),
            raw_value: self.value.clone(),
            unit: self.unit.clone(),
        }
    }
}

// ── EventListener ────────────────────────────────────────────────────

/// Receives events of one subscription.
///
/// Callbacks run on the stream's background task and must not block.
/// They must also not call [`EventStream::unsubscribe`] for their own
/// subscription, since unsubscribing waits for in-flight callbacks.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EventRecord);

    /// The stream gave up after exhausting its retry limit.
    fn on_closed(&self, _ha_id: &str) {}

    /// The event endpoint answered 429.
    fn on_rate_limit_reached(&self, _ha_id: &str) {}
}

/// Identity of two listener handles, by data pointer only.
///
/// Vtable pointers of the same type can differ across codegen units.
fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── SubscriptionHandle ───────────────────────────────────────────────

/// Identifies one subscription returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: Uuid,
    appliance_id: String,
}

impl SubscriptionHandle {
    /// A fresh handle for `appliance_id` with a random id.
    pub fn new(appliance_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            appliance_id: appliance_id.into(),
        }
    }

    pub fn appliance_id(&self) -> &str {
        &self.appliance_id
    }
}

struct Subscription {
    handle: SubscriptionHandle,
    listener: Arc<dyn EventListener>,
    cancel: CancellationToken,
    /// `true` while callbacks may be delivered. Held during each callback.
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop the task and wait out any callback already in progress.
    fn close(self) {
        self.cancel.cancel();
        *self.gate.lock().expect("delivery gate lock poisoned") = false;
        self.task.abort();
    }
}

// ── EventStream ──────────────────────────────────────────────────────

/// Manages event stream connections for any number of appliances.
pub struct EventStream {
    transport: Arc<AuthenticatedTransport>,
    reconnect: ReconnectConfig,
    events: Arc<DiagnosticLog<EventRecord>>,
    connections: Arc<DiagnosticLog<RequestRecord>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventStream {
    pub fn new(transport: Arc<AuthenticatedTransport>, reconnect: ReconnectConfig) -> Self {
        Self::with_history(transport, reconnect, Vec::new())
    }

    /// Create a stream manager whose event log starts with earlier history.
    pub fn with_history(
        transport: Arc<AuthenticatedTransport>,
        reconnect: ReconnectConfig,
        history: impl IntoIterator<Item = Arc<EventRecord>>,
    ) -> Self {
        Self {
            transport,
            reconnect,
            events: Arc::new(DiagnosticLog::with_history(EVENT_LOG_CAPACITY, history)),
            connections: Arc::new(DiagnosticLog::new(REQUEST_LOG_CAPACITY)),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Start streaming events of `ha_id` to `listener`.
    ///
    /// Returns immediately; the connection is opened by a background task.
    /// Subscribing the same listener to the same appliance again returns
    /// the existing handle. Must be called within a Tokio runtime.
    pub fn subscribe(&self, ha_id: &str, listener: Arc<dyn EventListener>) -> SubscriptionHandle {
        let mut subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");

        if let Some(pos) = subscriptions
            .iter()
            .position(|s| s.handle.appliance_id == ha_id && same_listener(&s.listener, &listener))
        {
            if !subscriptions[pos].task.is_finished() {
                debug!(ha_id, "already subscribed, returning existing handle");
                return subscriptions[pos].handle.clone();
            }
            subscriptions.swap_remove(pos).close();
        }

        let handle = SubscriptionHandle::new(ha_id);
        let cancel = CancellationToken::new();
        let gate = Arc::new(Mutex::new(true));

        let ctx = StreamContext {
            transport: Arc::clone(&self.transport),
            ha_id: ha_id.to_owned(),
            listener: Arc::clone(&listener),
            gate: Arc::clone(&gate),
            events: Arc::clone(&self.events),
            connections: Arc::clone(&self.connections),
            reconnect: self.reconnect.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(stream_loop(ctx));

        info!(ha_id, id = %handle.id, "subscribed to appliance events");
        subscriptions.push(Subscription {
            handle: handle.clone(),
            listener,
            cancel,
            gate,
            task,
        });
        handle
    }

    /// Stop a subscription. Returns `false` if it was already gone.
    ///
    /// A callback already running is allowed to finish; none is delivered
    /// after this returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
            subscriptions
                .iter()
                .position(|s| s.handle == *handle)
                .map(|pos| subscriptions.swap_remove(pos))
        };
        match removed {
            Some(subscription) => {
                subscription.close();
                info!(
                    ha_id = %handle.appliance_id,
                    id = %handle.id,
                    "unsubscribed from appliance events"
                );
                true
            }
            None => false,
        }
    }

    /// Number of live connections.
    pub fn active_count(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .iter()
            .filter(|s| !s.task.is_finished())
            .count()
    }

    /// Stop every subscription. Safe to call repeatedly.
    pub fn dispose_all(&self) {
        let drained: Vec<Subscription> = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .drain(..)
            .collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "disposing all event subscriptions");
        }
        for subscription in drained {
            subscription.close();
        }
    }

    /// Latest events of every appliance, oldest first.
    pub fn latest_events(&self) -> Vec<Arc<EventRecord>> {
        self.events.snapshot()
    }

    /// Latest events of one appliance, oldest first.
    pub fn latest_events_for(&self, ha_id: &str) -> Vec<Arc<EventRecord>> {
        self.events
            .snapshot()
            .into_iter()
            .filter(|e| e.appliance_id == ha_id)
            .collect()
    }

    /// Latest connection attempts, oldest first.
    pub fn latest_connection_attempts(&self) -> Vec<Arc<RequestRecord>> {
        self.connections.snapshot()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Ok(subscriptions) = self.subscriptions.get_mut() {
            for subscription in subscriptions.iter() {
                subscription.cancel.cancel();
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("reconnect", &self.reconnect)
            .field("active", &self.active_count())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct StreamContext {
    transport: Arc<AuthenticatedTransport>,
    ha_id: String,
    listener: Arc<dyn EventListener>,
    gate: Arc<Mutex<bool>>,
    events: Arc<DiagnosticLog<EventRecord>>,
    connections: Arc<DiagnosticLog<RequestRecord>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

impl StreamContext {
    /// Run `f` against the listener unless the subscription was closed.
    fn deliver(&self, f: impl FnOnce(&dyn EventListener)) {
        let open = self.gate.lock().expect("delivery gate lock poisoned");
        if *open {
            f(self.listener.as_ref());
        }
    }

    fn dispatch(&self, record: EventRecord) {
        let record = Arc::new(record);
        self.events.push_arc(Arc::clone(&record));
        self.deliver(|listener| listener.on_event(&record));
    }
}

/// Main loop: connect → read → on error, backoff → reconnect.
async fn stream_loop(ctx: StreamContext) {
    let mut attempt: u32 = 0;
    let connected = AtomicBool::new(false);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            result = connect_and_read(&ctx, &connected) => {
                if connected.swap(false, Ordering::Relaxed) {
                    attempt = 0;
                }
                match result {
                    // Stream ended without an error. Reconnect immediately.
                    Ok(()) => {
                        info!(ha_id = %ctx.ha_id, "event stream closed, reconnecting");
                    }
                    Err(e) => {
                        warn!(ha_id = %ctx.ha_id, error = %e, attempt, "event stream error");

                        if matches!(e, Error::RateLimited { .. }) {
                            ctx.deliver(|l| l.on_rate_limit_reached(&ctx.ha_id));
                        }
                        if e.is_auth_expired() {
                            if let Err(refresh) = ctx.transport.force_refresh().await {
                                warn!(ha_id = %ctx.ha_id, error = %refresh, "token refresh failed");
                            }
                        }

                        if let Some(max) = ctx.reconnect.max_retries {
                            if attempt >= max {
                                error!(
                                    ha_id = %ctx.ha_id,
                                    max_retries = max,
                                    "event stream reconnection limit reached, giving up"
                                );
                                ctx.deliver(|l| l.on_closed(&ctx.ha_id));
                                break;
                            }
                        }

                        let mut delay = calculate_backoff(attempt, &ctx.reconnect);
                        if let Error::RateLimited { retry_after_secs: Some(secs), .. } = e {
                            delay = delay.max(Duration::from_secs(secs));
                        }
                        debug!(
                            ha_id = %ctx.ha_id,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = ctx.cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }

    debug!(ha_id = %ctx.ha_id, "event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one stream connection and read frames until it drops.
///
/// Sets `connected` once the server accepted the stream.
async fn connect_and_read(ctx: &StreamContext, connected: &AtomicBool) -> Result<(), Error> {
    let path = format!("/api/homeappliances/{}/events", ctx.ha_id);
    let response = ctx
        .transport
        .open_stream(&path, &ctx.ha_id, &ctx.cancel, &ctx.connections)
        .await?;

    info!(ha_id = %ctx.ha_id, "event stream connected");
    connected.store(true, Ordering::Relaxed);

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Ok(()),
            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for frame in decoder.push(&bytes) {
                            for record in parse_frame(&frame, &ctx.ha_id, Utc::now()) {
                                ctx.dispatch(record);
                            }
                        }
                    }
                    Some(Err(e)) => return Err(Error::Transport(e)),
                    None => return Ok(()),
                }
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig::default();
        let d40 = calculate_backoff(40, &config);
        assert!(
            d40 <= Duration::from_secs_f64(37.5),
            "delay at attempt 40 ({d40:?}) should be capped near max_delay"
        );
    }

    struct Quiet;

    impl EventListener for Quiet {
        fn on_event(&self, _event: &EventRecord) {}
    }

    #[test]
    fn listener_identity_follows_the_allocation() {
        let concrete = Arc::new(Quiet);
        let a: Arc<dyn EventListener> = concrete.clone();
        let b: Arc<dyn EventListener> = concrete;
        let other: Arc<dyn EventListener> = Arc::new(Quiet);

        assert!(same_listener(&a, &b));
        assert!(!same_listener(&a, &other));
    }

    #[test]
    fn record_converts_to_value() {
        let record = EventRecord {
            appliance_id: "HA".into(),
            kind: EventKind::StatusChange,
            key: "BSH.Common.Status.DoorState".into(),
            value: Some("BSH.Common.EnumType.DoorState.Open".into()),
            unit: None,
            timestamp: Utc::now(),
        };
        let value = record.to_value();
        assert_eq!(value.key, "BSH.Common.Status.DoorState");
        assert_eq!(value.raw(), Some("BSH.Common.EnumType.DoorState.Open"));
        assert_eq!(EventKind::KeepAlive.to_string(), "KEEP_ALIVE");
    }
}
