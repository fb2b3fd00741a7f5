//! Server-sent event decoding.
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete frames
//! (`event:` / `data:` / `id:` lines terminated by a blank line), and
//! [`parse_frame`] maps one frame onto zero or more [`EventRecord`]s.

use bytes::{Buf, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::events::{EventKind, EventRecord};

// ── Frame decoding ───────────────────────────────────────────────────

/// One complete server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Longest line the decoder buffers while waiting for its terminator.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Incremental decoder for a `text/event-stream` body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    current: SseFrame,
    has_fields: bool,
    /// Dropping the rest of an oversized line.
    skipping: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes.
    ///
    /// A line longer than [`MAX_LINE_LEN`] is discarded up to its newline,
    /// together with the frame it belongs to.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if self.skipping {
                self.skipping = false;
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if self.has_fields {
                    frames.push(std::mem::take(&mut self.current));
                    self.has_fields = false;
                }
                continue;
            }
            self.field(line);
        }

        if self.skipping {
            self.buf.clear();
        } else if self.buf.len() > MAX_LINE_LEN {
            tracing::warn!(
                pending = self.buf.len(),
                "event stream line exceeds {MAX_LINE_LEN} bytes, dropping it"
            );
            self.buf.clear();
            self.current = SseFrame::default();
            self.has_fields = false;
            self.skipping = true;
        }
        frames
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.current.event = Some(value.to_owned()),
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
            }
            "id" => self.current.id = Some(value.to_owned()),
            _ => return,
        }
        self.has_fields = true;
    }
}

// ── Frame → records ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FramePayload {
    #[serde(rename = "haId")]
    ha_id: Option<String>,
    #[serde(default)]
    items: Option<Vec<ItemPayload>>,
    #[serde(flatten)]
    single: ItemPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ItemPayload {
    key: Option<String>,
    value: Option<serde_json::Value>,
    unit: Option<String>,
    timestamp: Option<i64>,
}

/// Map an SSE event name onto an [`EventKind`].
///
/// `NOTIFY` items are setting changes when their key names a setting.
pub fn event_kind(event: &str, key: Option<&str>) -> Option<EventKind> {
    let kind = match event.to_ascii_uppercase().as_str() {
        "KEEP-ALIVE" => EventKind::KeepAlive,
        "CONNECTED" | "PAIRED" => EventKind::Connected,
        "DISCONNECTED" | "DEPAIRED" => EventKind::Disconnected,
        "STATUS" => EventKind::StatusChange,
        "NOTIFY" if key.is_some_and(|k| k.contains(".Setting.")) => EventKind::SettingChange,
        "NOTIFY" => EventKind::Notify,
        "EVENT" => EventKind::ApplianceEvent,
        _ => return None,
    };
    Some(kind)
}

/// Convert one frame into records for `ha_id`.
///
/// A payload with `items[]` yields one record per item. Frames with an
/// unknown event name yield nothing. Items without a timestamp are stamped
/// with `received`.
pub fn parse_frame(frame: &SseFrame, ha_id: &str, received: DateTime<Utc>) -> Vec<EventRecord> {
    let Some(event) = frame.event.as_deref() else {
        return Vec::new();
    };

    let payload: Option<FramePayload> = if frame.data.trim().is_empty() {
        None
    } else {
        match serde_json::from_str(&frame.data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::debug!(error = %e, event, "failed to parse event payload");
                None
            }
        }
    };

    let appliance_id = payload
        .as_ref()
        .and_then(|p| p.ha_id.clone())
        .or_else(|| frame.id.clone().filter(|id| !id.is_empty()))
        .unwrap_or_else(|| ha_id.to_owned());

    let items = match payload {
        Some(FramePayload {
            items: Some(items), ..
        }) => items,
        Some(FramePayload { single, .. }) => vec![single],
        None => vec![ItemPayload::default()],
    };

    items
        .into_iter()
        .filter_map(|item| {
            let kind = event_kind(event, item.key.as_deref())?;
            Some(EventRecord {
                appliance_id: appliance_id.clone(),
                kind,
                key: item.key.unwrap_or_else(|| event.to_ascii_uppercase()),
                value: item.value.and_then(scalar_text),
                unit: item.unit,
                timestamp: item
                    .timestamp
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                    .unwrap_or(received),
            })
        })
        .collect()
}

fn scalar_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const HA_ID: &str = "BOSCH-WAT286H0GB-68A40E251CB2";

    #[test]
    fn decodes_frames_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: KEEP-ALIVE\r\nda").is_empty());
        let frames = decoder.push(b"ta: \r\n\r\nevent: STATUS\ndata: {}\nid: x\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: Some("KEEP-ALIVE".into()),
                    data: String::new(),
                    id: None,
                },
                SseFrame {
                    event: Some("STATUS".into()),
                    data: "{}".into(),
                    id: Some("x".into()),
                },
            ]
        );
    }

    #[test]
    fn oversized_line_is_dropped_with_its_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: NOTIFY\ndata: ").is_empty());
        let filler = vec![b'x'; MAX_LINE_LEN];
        assert!(decoder.push(&filler).is_empty());
        assert!(decoder.buf.is_empty());
        assert!(decoder.push(&filler).is_empty());
        assert!(decoder.buf.is_empty());

        // The tail of the long line and its blank terminator yield nothing.
        let frames = decoder.push(b"xxx\n\nevent: KEEP-ALIVE\ndata: \n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("KEEP-ALIVE".into()),
                data: String::new(),
                id: None,
            }]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b": ping\n\n\n").is_empty());
    }

    #[test]
    fn items_produce_one_record_each() {
        let frame = SseFrame {
            event: Some("STATUS".into()),
            data: serde_json::json!({
                "haId": HA_ID,
                "items": [
                    { "key": "BSH.Common.Status.DoorState",
                      "value": "BSH.Common.EnumType.DoorState.Open",
                      "timestamp": 1_509_366_004 },
                    { "key": "BSH.Common.Option.RemainingProgramTime",
                      "value": 3540, "unit": "seconds" }
                ]
            })
            .to_string(),
            id: Some(HA_ID.into()),
        };
        let now = Utc::now();
        let records = parse_frame(&frame, "fallback", now);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].appliance_id, HA_ID);
        assert_eq!(records[0].kind, EventKind::StatusChange);
        assert_eq!(records[0].timestamp.timestamp(), 1_509_366_004);
        assert_eq!(records[1].value.as_deref(), Some("3540"));
        assert_eq!(records[1].unit.as_deref(), Some("seconds"));
        assert_eq!(records[1].timestamp, now);
    }

    #[test]
    fn notify_splits_settings_from_options() {
        assert_eq!(
            event_kind("NOTIFY", Some("BSH.Common.Setting.PowerState")),
            Some(EventKind::SettingChange)
        );
        assert_eq!(
            event_kind("NOTIFY", Some("BSH.Common.Option.ProgramProgress")),
            Some(EventKind::Notify)
        );
        assert_eq!(event_kind("PAIRED", None), Some(EventKind::Connected));
        assert_eq!(event_kind("depaired", None), Some(EventKind::Disconnected));
        assert_eq!(event_kind("SOMETHING", None), None);
    }

    #[test]
    fn keep_alive_without_data_yields_single_record() {
        let frame = SseFrame {
            event: Some("KEEP-ALIVE".into()),
            data: String::new(),
            id: None,
        };
        let records = parse_frame(&frame, HA_ID, Utc::now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::KeepAlive);
        assert_eq!(records[0].key, "KEEP-ALIVE");
        assert_eq!(records[0].appliance_id, HA_ID);
    }

    #[test]
    fn disconnected_frame_uses_payload_key() {
        let frame = SseFrame {
            event: Some("DISCONNECTED".into()),
            data: serde_json::json!({
                "haId": HA_ID,
                "key": "BSH.Common.Appliance.Disconnected",
                "value": true
            })
            .to_string(),
            id: Some(HA_ID.into()),
        };
        let records = parse_frame(&frame, "fallback", Utc::now());
        assert_eq!(records[0].kind, EventKind::Disconnected);
        assert_eq!(records[0].key, "BSH.Common.Appliance.Disconnected");
        assert_eq!(records[0].value.as_deref(), Some("true"));
    }
}
