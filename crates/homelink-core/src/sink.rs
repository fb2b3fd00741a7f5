// ── Host-facing sink ──

use crate::channel::{ChannelRecord, ConnectionHandle};

/// Receives what monitors produce.
///
/// Called from the event stream task and from the watchdog task, so
/// implementations must be cheap and must not block.
pub trait RecordSink: Send + Sync {
    /// A batch of records, all produced by one reading or one event.
    fn new_records(&self, records: Vec<ChannelRecord>);

    /// The monitor behind `connection` gave up. The owner decides whether
    /// and when to start a new one.
    fn connection_interrupted(&self, driver_id: &str, connection: &ConnectionHandle);
}
