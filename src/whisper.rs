use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WhisperConfig;
use crate::state::AppState;

/// One whisper parsed out of a captured packet payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Whisper {
    pub name: String,
    pub channel: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhisperRecord {
    pub name: String,
    pub channel: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl From<Whisper> for WhisperRecord {
    fn from(w: Whisper) -> Self {
        Self {
            name: w.name,
            channel: w.channel,
            content: w.content,
            received_at: Utc::now(),
        }
    }
}

/// Extract a whisper from a hex-encoded payload.
///
/// The payload carries a fixed header marker; the interesting bytes start
/// `skip_after_header` hex digits past it and hold three hex runs (name,
/// channel, content) captured by `data_pattern`. Only payloads whose
/// decoded channel matches `channel_pattern` count as whispers.
pub fn parse_payload(cfg: &WhisperConfig, payload_hex: &str) -> Option<Whisper> {
    let header = payload_hex.find(&cfg.header_marker)?;
    let content_start = header + cfg.header_marker.len() + cfg.skip_after_header;
    let rest = payload_hex.get(content_start..)?;

    let caps = cfg.data_pattern.captures(rest)?;
    let channel = decode_hex_utf8(caps.get(2)?.as_str());
    if !cfg.channel_pattern.is_match(&channel) {
        return None;
    }

    Some(Whisper {
        name: decode_hex_utf8(caps.get(1)?.as_str()),
        channel,
        content: decode_hex_utf8(caps.get(3)?.as_str()),
    })
}

/// Decode a run of hex digit pairs as UTF-8, keeping a visible placeholder
/// for input that is not valid hex.
fn decode_hex_utf8(hex: &str) -> String {
    if hex.len() % 2 != 0 {
        return "<undecodable>".into();
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks_exact(2) {
        let Ok(s) = std::str::from_utf8(pair) else {
            return "<undecodable>".into();
        };
        let Ok(byte) = u8::from_str_radix(s, 16) else {
            return "<undecodable>".into();
        };
        bytes.push(byte);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Append-only JSONL sink for parsed whispers.
pub struct WhisperLog {
    path: PathBuf,
}

impl WhisperLog {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("failed to create {}: {e}", parent.display());
            }
        }
        Self { path }
    }

    pub fn append(&self, record: &WhisperRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("failed to serialize whisper record: {e}");
                return;
            }
        };

        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    tracing::warn!("failed to write to {}: {e}", self.path.display());
                }
            }
            Err(e) => {
                tracing::warn!("failed to open {}: {e}", self.path.display());
            }
        }
    }
}

/// Consume raw payloads from the capture side and fan parsed whispers into
/// the shared state and the on-disk log. The capture transport itself lives
/// outside this process; anything able to reach the ingest endpoint can
/// feed the channel.
pub fn spawn_service(
    state: AppState,
    cfg: WhisperConfig,
    log: WhisperLog,
    mut rx: mpsc::Receiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let Some(whisper) = parse_payload(&cfg, &payload) else {
                tracing::debug!("payload did not parse as a whisper ({} hex digits)", payload.len());
                continue;
            };
            tracing::info!("whisper from {} on {}", whisper.name, whisper.channel);
            let record = WhisperRecord::from(whisper);
            log.append(&record);
            state.lock().await.push_whisper(record);
        }
        tracing::info!("whisper channel closed, service stopping");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn test_cfg() -> WhisperConfig {
        WhisperConfig {
            header_marker: "77686973706572".into(), // "whisper"
            skip_after_header: 8,
            data_pattern: Regex::new("([0-9a-f]+?)3a([0-9a-f]+?)3a([0-9a-f]+)").unwrap(),
            channel_pattern: Regex::new("^ch[0-9]+$").unwrap(),
            log_path: "logs/test.jsonl".into(),
        }
    }

    fn hex(s: &str) -> String {
        s.bytes().map(|b| format!("{b:02x}")).collect()
    }

    /// Payload layout used by the tests: junk, header, 8 skipped digits,
    /// then name ":" channel ":" content, all hex-encoded.
    fn payload(name: &str, channel: &str, content: &str) -> String {
        format!(
            "deadbeef{}00000000{}3a{}3a{}",
            hex("whisper"),
            hex(name),
            hex(channel),
            hex(content)
        )
    }

    #[test]
    fn test_parse_payload_roundtrip() {
        let w = parse_payload(&test_cfg(), &payload("eve", "ch7", "two sets please")).unwrap();
        assert_eq!(
            w,
            Whisper {
                name: "eve".into(),
                channel: "ch7".into(),
                content: "two sets please".into(),
            }
        );
    }

    #[test]
    fn test_parse_payload_decodes_utf8() {
        let w = parse_payload(&test_cfg(), &payload("한라봉", "ch1", "일반 2세트")).unwrap();
        assert_eq!(w.name, "한라봉");
        assert_eq!(w.content, "일반 2세트");
    }

    #[test]
    fn test_parse_payload_requires_header() {
        let body = format!("{}3a{}3a{}", hex("eve"), hex("ch7"), hex("hello"));
        assert!(parse_payload(&test_cfg(), &body).is_none());
    }

    #[test]
    fn test_parse_payload_rejects_foreign_channel() {
        assert!(parse_payload(&test_cfg(), &payload("eve", "party", "hello")).is_none());
    }

    #[test]
    fn test_parse_payload_short_remainder() {
        let truncated = format!("{}0000", hex("whisper"));
        assert!(parse_payload(&test_cfg(), &truncated).is_none());
    }

    #[test]
    fn test_decode_hex_utf8_placeholder_on_garbage() {
        assert_eq!(decode_hex_utf8("zz"), "<undecodable>");
        assert_eq!(decode_hex_utf8("abc"), "<undecodable>");
        assert_eq!(decode_hex_utf8(&hex("ok")), "ok");
    }

    #[test]
    fn test_whisper_log_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whispers.jsonl");
        let log = WhisperLog::new(path.clone());

        for name in ["eve", "mallory"] {
            log.append(&WhisperRecord::from(Whisper {
                name: name.into(),
                channel: "ch1".into(),
                content: "hi".into(),
            }));
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["name"], "eve");
        assert_eq!(first["channel"], "ch1");
    }
}
