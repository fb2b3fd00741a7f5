//! Per-appliance connection supervision.
//!
//! An [`ApplianceMonitor`] owns one appliance's connection lifecycle:
//!
//! 1. **Seeding** polls every configured channel once. Channel-level
//!    failures become flagged records; an offline or rate-limited appliance
//!    gets marker strings on its string channels; anything else closes the
//!    monitor.
//! 2. **Subscribed** forwards pushed events to the sink and resets the
//!    keepalive watchdog on every event.
//! 3. **Degraded** is reported after a few silent watchdog ticks.
//! 4. **Closed** follows too many silent ticks (or a stream that gave up):
//!    the subscription is released and the sink is told the connection was
//!    interrupted, exactly once. Reconnecting means building a new monitor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use homelink_api::access::program_key_value;
use homelink_api::resource::is_measured_temperature;
use homelink_api::{
    Error, EventKind, EventListener, EventRecord, ResourceCategory, SubscriptionHandle, Value,
};

use crate::api::{ApplianceApi, EventSubscriber};
use crate::channel::{ChannelConfig, ChannelFlag, ChannelRecord, ConnectionHandle};
use crate::config::MonitorConfig;
use crate::error::CoreError;
use crate::sink::RecordSink;
use crate::value::{TypedValue, format_decimal};

/// Written to string channels while the appliance is unreachable.
pub const OFFLINE_MARKER: &str = "HomeAppliance is offline";

/// Written to string channels when seeding hit the API rate limit.
pub const RATE_LIMIT_MARKER: &str = "Too many requests in a given amount of time";

/// Measured temperatures arrive in eighths of a degree.
const MEASURED_TEMPERATURE_DIVISOR: f64 = 8.0;

const SETPOINT_UNIT: &str = "°C";

// ── MonitorState ─────────────────────────────────────────────────────

/// Lifecycle state observable through [`ApplianceMonitor::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MonitorState {
    Seeding,
    Subscribed,
    /// Some keepalive windows passed without any event.
    Degraded,
    Closed,
}

// ── ApplianceMonitor ─────────────────────────────────────────────────

/// Supervises the connection to one appliance.
///
/// Cheaply cloneable. Background work (watchdog, event callbacks) only
/// holds weak references, so dropping the last clone stops it.
#[derive(Clone)]
pub struct ApplianceMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    connection: ConnectionHandle,
    config: MonitorConfig,
    channels: Vec<ChannelConfig>,
    api: Arc<dyn ApplianceApi>,
    events: Arc<dyn EventSubscriber>,
    sink: Arc<dyn RecordSink>,
    state: watch::Sender<MonitorState>,
    online: AtomicBool,
    misses: AtomicU32,
    started: AtomicBool,
    /// Set once by `interrupt` or `shutdown`.
    closed: AtomicBool,
    subscription: Mutex<Option<SubscriptionHandle>>,
    cancel: CancellationToken,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

/// How seeding ended.
enum Seeding {
    Complete,
    Offline,
    RateLimited,
    Failed(Error),
}

impl ApplianceMonitor {
    /// Create a monitor for `appliance_id`. Does not touch the network;
    /// call [`start()`](Self::start).
    ///
    /// Channels bound to other appliances are ignored.
    pub fn new(
        appliance_id: impl Into<String>,
        channels: Vec<ChannelConfig>,
        api: Arc<dyn ApplianceApi>,
        events: Arc<dyn EventSubscriber>,
        sink: Arc<dyn RecordSink>,
        config: MonitorConfig,
    ) -> Self {
        let connection = ConnectionHandle::new(appliance_id);
        let (channels, foreign): (Vec<_>, Vec<_>) = channels
            .into_iter()
            .partition(|c| c.appliance_id == connection.appliance_id);
        for channel in &foreign {
            warn!(
                channel = %channel.id,
                appliance_id = %connection.appliance_id,
                "ignoring channel bound to another appliance"
            );
        }
        let (state, _) = watch::channel(MonitorState::Seeding);

        Self {
            inner: Arc::new(MonitorInner {
                connection,
                config,
                channels,
                api,
                events,
                sink,
                state,
                online: AtomicBool::new(false),
                misses: AtomicU32::new(0),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                subscription: Mutex::new(None),
                cancel: CancellationToken::new(),
                watchdog: Mutex::new(None),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn appliance_id(&self) -> &str {
        &self.inner.connection.appliance_id
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.inner.connection
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.inner.channels
    }

    /// Subscribe to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<MonitorState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> MonitorState {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Watchdog ticks since the last event.
    pub fn missed_keepalives(&self) -> u32 {
        self.inner.misses.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Seed every channel, then subscribe and start the watchdog.
    ///
    /// An offline or rate-limited appliance is not an error: markers are
    /// written and supervision continues (without a subscription when rate
    /// limited). Any other connection-level failure closes the monitor,
    /// notifies the sink and is returned.
    pub async fn start(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(CoreError::Closed {
                appliance_id: self.appliance_id().to_owned(),
            });
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            debug!(appliance_id = %self.appliance_id(), "monitor already started");
            return Ok(());
        }

        inner.state.send_replace(MonitorState::Seeding);
        info!(
            appliance_id = %self.appliance_id(),
            channels = inner.channels.len(),
            "seeding appliance channels"
        );

        match inner.seed().await {
            Seeding::Complete => {
                inner.online.store(true, Ordering::SeqCst);
                self.subscribe();
                self.spawn_watchdog();
                inner.state.send_replace(MonitorState::Subscribed);
            }
            Seeding::Offline => {
                warn!(appliance_id = %self.appliance_id(), "appliance offline during seeding");
                inner.mark_offline(Utc::now());
                self.subscribe();
                self.spawn_watchdog();
                inner.state.send_replace(MonitorState::Subscribed);
            }
            Seeding::RateLimited => {
                warn!(
                    appliance_id = %self.appliance_id(),
                    "rate limited during seeding, waiting for the watchdog to recycle the connection"
                );
                inner.online.store(false, Ordering::SeqCst);
                inner.emit_marker(RATE_LIMIT_MARKER, Utc::now());
                self.spawn_watchdog();
                inner.state.send_replace(MonitorState::Degraded);
            }
            Seeding::Failed(err) => {
                error!(appliance_id = %self.appliance_id(), error = %err, "seeding failed");
                inner.interrupt();
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Stop supervision without notifying the sink, and wait for the
    /// watchdog to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let was_closed = inner.closed.swap(true, Ordering::SeqCst);
        inner.cancel.cancel();
        inner.release_subscription();

        let task = inner.watchdog.lock().expect("watchdog lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "keepalive watchdog task failed");
                }
            }
        }

        inner.online.store(false, Ordering::SeqCst);
        inner.state.send_replace(MonitorState::Closed);
        if !was_closed {
            info!(appliance_id = %self.appliance_id(), "appliance monitor shut down");
        }
    }

    // ── Channel access ───────────────────────────────────────────────

    /// Read one channel on demand.
    ///
    /// Channel-level failures come back as flagged records; connection-level
    /// failures are returned as errors.
    pub async fn read(&self, channel_id: &str) -> Result<ChannelRecord, CoreError> {
        let inner = &self.inner;
        let channel = inner.channel(channel_id)?;
        let now = Utc::now();
        match inner.api.read(&channel.appliance_id, channel.resource).await {
            Ok(value) => Ok(inner.record_for(channel, &scale_measured_temperature(value), now)),
            Err(e) => match channel_flag(&e) {
                Some(flag) => Ok(ChannelRecord::flagged(&channel.id, flag, now)),
                None => Err(e.into()),
            },
        }
    }

    /// Write `value` to a channel. Temperature setpoints are sent in °C.
    pub async fn write(&self, channel_id: &str, value: &TypedValue) -> Result<(), CoreError> {
        let inner = &self.inner;
        let channel = inner.channel(channel_id)?;
        if !channel.resource.is_writable() {
            warn!(channel = %channel.id, resource = channel.resource.name, "resource is read-only");
            return Err(CoreError::Unsupported {
                operation: format!("writing {}", channel.resource.name),
            });
        }

        let unit = channel
            .resource
            .is_temperature_setpoint()
            .then_some(SETPOINT_UNIT);
        let wire = value.to_wire(channel.resource.key, unit);
        debug!(
            channel = %channel.id,
            resource = channel.resource.name,
            value = %value,
            "writing channel"
        );
        inner
            .api
            .write(&channel.appliance_id, channel.resource, &wire)
            .await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn subscribe(&self) {
        let listener: Arc<dyn EventListener> = Arc::new(MonitorListener {
            inner: Arc::downgrade(&self.inner),
        });
        let handle = self.inner.events.subscribe(self.appliance_id(), listener);
        *self
            .inner
            .subscription
            .lock()
            .expect("subscription lock poisoned") = Some(handle);
    }

    fn spawn_watchdog(&self) {
        let task = tokio::spawn(watchdog_loop(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
            self.inner.config.keepalive_interval,
        ));
        *self.inner.watchdog.lock().expect("watchdog lock poisoned") = Some(task);
    }
}

impl std::fmt::Debug for ApplianceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplianceMonitor")
            .field("appliance_id", &self.appliance_id())
            .field("state", &self.current_state())
            .field("online", &self.is_online())
            .field("missed_keepalives", &self.missed_keepalives())
            .field("channels", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}

// ── MonitorInner ─────────────────────────────────────────────────────

impl MonitorInner {
    fn channel(&self, channel_id: &str) -> Result<&ChannelConfig, CoreError> {
        self.channels
            .iter()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| CoreError::UnknownChannel {
                channel_id: channel_id.to_owned(),
            })
    }

    /// Poll every channel once, in order, and deliver the results as one batch.
    async fn seed(&self) -> Seeding {
        let now = Utc::now();
        let mut records = Vec::with_capacity(self.channels.len());
        let mut outcome = Seeding::Complete;

        for channel in &self.channels {
            match self.api.read(&channel.appliance_id, channel.resource).await {
                Ok(value) => {
                    records.push(self.record_for(channel, &scale_measured_temperature(value), now));
                }
                Err(e) => {
                    if let Some(flag) = channel_flag(&e) {
                        warn!(
                            channel = %channel.id,
                            resource = channel.resource.name,
                            %flag,
                            error = %e,
                            "channel unavailable"
                        );
                        records.push(ChannelRecord::flagged(&channel.id, flag, now));
                        continue;
                    }
                    outcome = match e {
                        Error::ApplianceOffline { .. } => Seeding::Offline,
                        Error::RateLimited { .. } | Error::RateLimitTimeout { .. } => {
                            Seeding::RateLimited
                        }
                        other => Seeding::Failed(other),
                    };
                    break;
                }
            }
        }

        if !records.is_empty() {
            self.sink.new_records(records);
        }
        outcome
    }

    fn record_for(
        &self,
        channel: &ChannelConfig,
        value: &Value,
        timestamp: DateTime<Utc>,
    ) -> ChannelRecord {
        match TypedValue::from_wire(value, channel.resource.kind) {
            Ok(typed) => ChannelRecord::valid(&channel.id, typed, timestamp),
            Err(e) => {
                warn!(channel = %channel.id, error = %e, "cannot decode channel value");
                ChannelRecord::flagged(&channel.id, ChannelFlag::DriverErrorDecoding, timestamp)
            }
        }
    }

    fn handle_event(&self, event: &EventRecord) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.misses.store(0, Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if *state == MonitorState::Degraded {
                *state = MonitorState::Subscribed;
                true
            } else {
                false
            }
        });

        match event.kind {
            EventKind::KeepAlive => trace!(appliance_id = %event.appliance_id, "keepalive"),
            EventKind::Connected => {
                if !self.online.swap(true, Ordering::SeqCst) {
                    info!(appliance_id = %event.appliance_id, "appliance connected");
                }
            }
            EventKind::Disconnected => {
                info!(appliance_id = %event.appliance_id, "appliance disconnected");
                self.mark_offline(event.timestamp);
            }
            EventKind::Notify
            | EventKind::StatusChange
            | EventKind::SettingChange
            | EventKind::ApplianceEvent => {
                self.online.store(true, Ordering::SeqCst);
                self.dispatch(event.to_value(), event.timestamp);
            }
        }
    }

    /// Deliver `value` to every channel bound to its key, as one batch.
    ///
    /// Program events carry the program key; program channels see it the
    /// way a read would report it.
    fn dispatch(&self, value: Value, timestamp: DateTime<Utc>) {
        let value = scale_measured_temperature(value);
        let records: Vec<ChannelRecord> = self
            .channels
            .iter()
            .filter(|c| c.matches_key(&value.key))
            .map(|c| match c.resource.category {
                ResourceCategory::ProgramActive | ResourceCategory::ProgramSelected => {
                    let projected = program_key_value(c.resource, value.raw());
                    self.record_for(c, &projected, timestamp)
                }
                _ => self.record_for(c, &value, timestamp),
            })
            .collect();
        if records.is_empty() {
            trace!(key = %value.key, "event matches no channel");
            return;
        }
        self.sink.new_records(records);
    }

    fn mark_offline(&self, timestamp: DateTime<Utc>) {
        self.online.store(false, Ordering::SeqCst);
        self.emit_marker(OFFLINE_MARKER, timestamp);
    }

    /// Write `marker` to every string channel.
    fn emit_marker(&self, marker: &str, timestamp: DateTime<Utc>) {
        let records: Vec<ChannelRecord> = self
            .channels
            .iter()
            .filter(|c| c.is_string())
            .map(|c| ChannelRecord::valid(&c.id, TypedValue::String(marker.to_owned()), timestamp))
            .collect();
        if !records.is_empty() {
            self.sink.new_records(records);
        }
    }

    /// Count one watchdog tick. Returns `true` once the monitor is closed.
    fn on_watchdog_tick(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        let misses = self.misses.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        trace!(appliance_id = %self.connection.appliance_id, misses, "keepalive watchdog tick");

        if misses >= self.config.max_missed_keepalives {
            warn!(
                appliance_id = %self.connection.appliance_id,
                misses,
                "no events within the keepalive window, closing connection"
            );
            self.interrupt();
            return true;
        }
        if misses >= self.config.degraded_after_misses {
            self.state.send_if_modified(|state| {
                if *state == MonitorState::Subscribed {
                    *state = MonitorState::Degraded;
                    true
                } else {
                    false
                }
            });
        }
        false
    }

    /// Close the monitor and notify the sink. Only the first call has any effect.
    ///
    /// Must not run inside an event callback of this monitor's subscription.
    fn interrupt(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.online.store(false, Ordering::SeqCst);
        self.release_subscription();
        self.state.send_replace(MonitorState::Closed);
        info!(
            appliance_id = %self.connection.appliance_id,
            driver_id = %self.config.driver_id,
            "connection interrupted"
        );
        self.sink
            .connection_interrupted(&self.config.driver_id, &self.connection);
    }

    fn release_subscription(&self) {
        let handle = self
            .subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        if let Some(handle) = handle {
            self.events.unsubscribe(&handle);
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        let handle = self.subscription.get_mut().ok().and_then(Option::take);
        if let Some(handle) = handle {
            // The last reference may be dropped inside an event callback,
            // where unsubscribing inline would wait on that same callback.
            let events = Arc::clone(&self.events);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || events.unsubscribe(&handle));
                }
                Err(_) => {
                    events.unsubscribe(&handle);
                }
            }
        }
    }
}

// ── Event listener ───────────────────────────────────────────────────

struct MonitorListener {
    inner: Weak<MonitorInner>,
}

impl EventListener for MonitorListener {
    fn on_event(&self, event: &EventRecord) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_event(event);
        }
    }

    fn on_closed(&self, ha_id: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        warn!(appliance_id = ha_id, "event stream gave up");
        // Unsubscribing waits for in-flight callbacks, this one included.
        tokio::spawn(async move {
            inner.interrupt();
        });
    }

    fn on_rate_limit_reached(&self, ha_id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            warn!(appliance_id = ha_id, "event stream rate limited");
            inner.emit_marker(RATE_LIMIT_MARKER, Utc::now());
        }
    }
}

// ── Watchdog ─────────────────────────────────────────────────────────

async fn watchdog_loop(inner: Weak<MonitorInner>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if inner.on_watchdog_tick() {
                    break;
                }
            }
        }
    }
    debug!("keepalive watchdog exiting");
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Divide measured temperatures by eight: `"160"` becomes `"20.0"`.
/// Other keys and non-numeric values pass through unchanged.
pub fn scale_measured_temperature(mut value: Value) -> Value {
    if !is_measured_temperature(&value.key) {
        return value;
    }
    let scaled = value
        .raw()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .map(|n| format_decimal(n / MEASURED_TEMPERATURE_DIVISOR));
    match scaled {
        Some(scaled) => value.raw_value = Some(scaled),
        None => debug!(
            key = %value.key,
            raw = ?value.raw_value,
            "measured temperature is not numeric"
        ),
    }
    value
}

/// Flag for failures that only affect one channel.
fn channel_flag(err: &Error) -> Option<ChannelFlag> {
    match err {
        Error::UnsupportedOperation(_) => Some(ChannelFlag::AccessMethodNotSupported),
        Error::InvalidScopeOrId { .. } => Some(ChannelFlag::DriverErrorReadFailure),
        Error::Parse { .. } | Error::Deserialization { .. } => {
            Some(ChannelFlag::DriverErrorDecoding)
        }
        _ => None,
    }
}
