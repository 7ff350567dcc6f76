//! RTM wire types: inbound events, outbound replies and the frame written to the socket.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Event kind that the responder classifies; every other kind is dropped.
pub const MESSAGE_KIND: &str = "message";

/// Subtype of a message that shares a file.
pub const FILE_SHARE_SUBTYPE: &str = "file_share";

/// Inbound RTM event. Decoding is tolerant: every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub file: Option<FileObject>,
}

/// File attached to a `file_share` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileObject {
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub filetype: String,
    #[serde(default)]
    pub pretty_type: String,
}

impl Event {
    pub fn is_message(&self) -> bool {
        self.kind == MESSAGE_KIND
    }

    /// True for a file share whose MIME type is an image.
    pub fn is_image_share(&self) -> bool {
        self.subtype.as_deref() == Some(FILE_SHARE_SUBTYPE)
            && self
                .file
                .as_ref()
                .is_some_and(|f| f.mimetype.starts_with("image"))
    }
}

/// A reply to post into a channel. Built fresh for every response, never derived by mutating an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub channel: String,
    pub text: String,
}

impl Reply {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
        }
    }
}

/// Frame written to the RTM socket: `{ "type": "message", "channel", "user", "text", "ts" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub typ: String,
    pub channel: String,
    pub user: String,
    pub text: String,
    pub ts: String,
}

impl OutboundFrame {
    /// Stamp a reply with the bot's identity and a send timestamp.
    pub fn stamp(reply: Reply, self_id: &str, ts: String) -> Self {
        Self {
            typ: MESSAGE_KIND.to_string(),
            channel: reply.channel,
            user: self_id.to_string(),
            text: reply.text,
            ts,
        }
    }
}

/// Issues Slack-style `secs.micros` timestamps that strictly increase within the process.
#[derive(Debug, Default)]
pub struct TsClock {
    last_micros: AtomicI64,
}

impl TsClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: wall clock in microseconds, bumped past the previous value if the clock stalls or steps back.
    pub fn next(&self) -> String {
        let now = chrono::Utc::now().timestamp_micros();
        let prev = self
            .last_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        format_ts(now.max(prev + 1))
    }
}

fn format_ts(micros: i64) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_frame() {
        let ev: Event = serde_json::from_str(
            r#"{"type":"message","subtype":"file_share","channel":"C1","user":"U1","text":"look","ts":"1.000001",
                "file":{"mimetype":"image/png","filetype":"png","pretty_type":"PNG"}}"#,
        )
        .unwrap();
        assert!(ev.is_message());
        assert!(ev.is_image_share());
        assert_eq!(ev.channel, "C1");
        assert_eq!(ev.file.unwrap().pretty_type, "PNG");
    }

    #[test]
    fn decodes_sparse_frame() {
        let ev: Event = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert!(!ev.is_message());
        assert!(!ev.is_image_share());
        assert!(ev.text.is_empty());
    }

    #[test]
    fn non_image_share_is_not_image() {
        let ev: Event = serde_json::from_str(
            r#"{"type":"message","subtype":"file_share","file":{"mimetype":"application/pdf"}}"#,
        )
        .unwrap();
        assert!(!ev.is_image_share());
    }

    #[test]
    fn stamp_overwrites_user_and_ts() {
        let frame = OutboundFrame::stamp(Reply::new("C1", "hi"), "UBOT", "12.000003".into());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["user"], "UBOT");
        assert_eq!(json["ts"], "12.000003");
        assert_eq!(json["channel"], "C1");
    }

    #[test]
    fn ts_clock_is_strictly_increasing() {
        let clock = TsClock::new();
        let stamps: Vec<String> = (0..1000).map(|_| clock.next()).collect();
        let as_micros: Vec<i64> = stamps
            .iter()
            .map(|s| {
                let (secs, micros) = s.split_once('.').unwrap();
                assert_eq!(micros.len(), 6);
                secs.parse::<i64>().unwrap() * 1_000_000 + micros.parse::<i64>().unwrap()
            })
            .collect();
        assert!(as_micros.windows(2).all(|w| w[0] < w[1]));
    }
}
