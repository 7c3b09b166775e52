use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};

use crate::util::env_flag;

const DEFAULT_CLIENT_LOG_PATH: &str = "/tmp/tandem-client.log";
const DEBUG_PAYLOAD_ENV: &str = "TANDEM_DEBUG_PAYLOAD";
const CLIENT_LOG_PATH_ENV: &str = "TANDEM_LOG_PATH";

pub fn debug_payload_enabled() -> bool {
    env_flag(DEBUG_PAYLOAD_ENV).unwrap_or(false)
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    let message =
        format!("TANDEM DEBUG request_payload url={request_url}\npayload:\n{formatted_payload}\n");
    emit_log_message(&message);
}

/// Frame lines that fail JSON decoding are skipped rather than fatal; record
/// them so a misbehaving server stays diagnosable after the fact.
pub fn emit_frame_decode_error(payload: &str, parse_error: &serde_json::Error) {
    let message =
        format!("TANDEM ERROR frame_decode_failed error={parse_error}\ndata:\n{payload}\n");
    emit_log_message(&message);
}

/// Trailing bytes left without a frame terminator when the stream closed.
pub fn emit_discarded_residual(residual: &str) {
    let message = format!(
        "TANDEM WARN stream_residual_discarded bytes={}\n{residual}\n",
        residual.len()
    );
    emit_log_message(&message);
}

fn emit_log_message(message: &str) {
    if let Some(path) = resolve_log_path() {
        if append_log_file(&path, message).is_ok() {
            return;
        }
    }

    eprintln!("{message}");
}

fn resolve_log_path() -> Option<String> {
    std::env::var(CLIENT_LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            if std::io::stderr().is_terminal() {
                Some(DEFAULT_CLIENT_LOG_PATH.to_string())
            } else {
                None
            }
        })
}

fn append_log_file(path: &str, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}
