//! Per-session JSONL event logs.
//!
//! Each logger appends `{ts, elapsed_ms, level, cat, event, data}` lines to
//! `<logs_dir>/<session>.jsonl` from a background task. Logging never blocks or fails the caller;
//! write errors are reported through `tracing`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tabpilot_common::{ExtensionHelloPayload, ExtensionLogPayload};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pruning::PruneReport;

pub const GLOBAL_LOG: &str = "_orchestrator";
const TRUNCATE_LIMIT: usize = 500;
const STACK_LIMIT: usize = 1000;

#[derive(Serialize)]
struct LogEntry<'a> {
    ts: String,
    elapsed_ms: u64,
    level: &'static str,
    cat: &'static str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Cut `s` to `limit` characters, noting how many were dropped.
pub fn truncate(s: &str, limit: usize) -> String {
    let total = s.chars().count();
    if total <= limit {
        return s.to_string();
    }
    let head: String = s.chars().take(limit).collect();
    format!("{head}... [{} more chars]", total - limit)
}

/// Filesystem-safe stem for a session id. Ids that had to be rewritten get a short digest of the
/// raw id appended, so distinct ids never share a file.
fn file_stem(session_id: &str) -> String {
    let sanitized = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string();
    if sanitized == session_id && !sanitized.is_empty() {
        return sanitized;
    }

    let digest = Sha256::digest(session_id.as_bytes());
    let short: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    let base = if sanitized.is_empty() { "session" } else { sanitized.as_str() };
    format!("{base}-{short}")
}

struct LoggerInner {
    session_id: String,
    started: Instant,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Clone, Default)]
pub struct SessionLogger {
    inner: Option<Arc<LoggerInner>>,
}

impl SessionLogger {
    /// Start a logger that truncates and then appends to `<logs_dir>/<session_id>.jsonl`.
    /// Outside a tokio runtime the logger is disabled.
    pub fn open(logs_dir: &Path, session_id: &str) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime for event log of {session_id}; logging disabled");
            return Self::disabled();
        };

        let stem = file_stem(session_id);
        let path = logs_dir.join(format!("{stem}.jsonl"));
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(write_lines(logs_dir.to_path_buf(), path, rx));

        Self {
            inner: Some(Arc::new(LoggerInner {
                session_id: session_id.to_string(),
                started: Instant::now(),
                tx,
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    fn entry(&self, level: &'static str, cat: &'static str, event: &str, data: Option<Value>) {
        let Some(inner) = &self.inner else {
            return;
        };
        debug!(session = %inner.session_id, cat, event, "event");

        let entry = LogEntry {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            elapsed_ms: inner.started.elapsed().as_millis() as u64,
            level,
            cat,
            event,
            data,
        };
        match serde_json::to_string(&entry) {
            Ok(mut line) => {
                line.push('\n');
                // the writer only goes away when its file could not be opened
                let _ = inner.tx.send(line);
            }
            Err(e) => warn!("failed to encode log entry {event}: {e}"),
        }
    }

    pub fn session_created(&self, domain: &str, url: &str, skill_count: usize, prompt_chars: usize) {
        let session_id = self
            .inner
            .as_ref()
            .map(|i| i.session_id.clone())
            .unwrap_or_default();
        self.entry(
            "info",
            "session",
            "created",
            Some(json!({
                "session_id": session_id,
                "domain": domain,
                "url": url,
                "skill_count": skill_count,
                "system_prompt_chars": prompt_chars,
            })),
        );
    }

    pub fn session_cancelled(&self) {
        self.entry("info", "session", "cancelled", None);
    }

    pub fn session_error(&self, error: &str, detail: Option<&str>) {
        let mut data = json!({ "error": error });
        if let Some(detail) = detail {
            data["stack"] = json!(truncate(detail, STACK_LIMIT));
        }
        self.entry("error", "error", "session_error", Some(data));
    }

    pub fn user_message(&self, content: &str) {
        self.entry(
            "info",
            "message",
            "user",
            Some(json!({
                "content": truncate(content, TRUNCATE_LIMIT),
                "full_length": content.chars().count(),
            })),
        );
    }

    pub fn agent_response(&self, text: &str, block_count: usize) {
        self.entry(
            "info",
            "message",
            "agent",
            Some(json!({
                "text": truncate(text, TRUNCATE_LIMIT),
                "full_length": text.chars().count(),
                "content_blocks": block_count,
            })),
        );
    }

    pub fn api_request(
        &self,
        model: &str,
        max_tokens: u32,
        message_count: usize,
        estimated_input_chars: usize,
        tool_count: usize,
    ) {
        self.entry(
            "info",
            "api",
            "request",
            Some(json!({
                "model": model,
                "max_tokens": max_tokens,
                "message_count": message_count,
                "estimated_input_chars": estimated_input_chars,
                "estimated_input_tokens": (estimated_input_chars as f64 / 4.0).round() as u64,
                "tool_count": tool_count,
            })),
        );
    }

    pub fn api_response(
        &self,
        model: &str,
        stop_reason: Option<&str>,
        input_tokens: u32,
        output_tokens: u32,
        duration_ms: u64,
    ) {
        self.entry(
            "info",
            "api",
            "response",
            Some(json!({
                "model": model,
                "stop_reason": stop_reason,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "duration_ms": duration_ms,
            })),
        );
    }

    pub fn tool_call(&self, tool_id: &str, tool_name: &str, input: &Value) {
        let input = input.to_string();
        self.entry(
            "info",
            "tool",
            "call",
            Some(json!({
                "tool_id": tool_id,
                "tool_name": tool_name,
                "input": truncate(&input, TRUNCATE_LIMIT),
                "input_length": input.chars().count(),
            })),
        );
    }

    pub fn tool_result(
        &self,
        tool_id: &str,
        tool_name: &str,
        output: &str,
        is_error: bool,
        duration_ms: u64,
        offloaded: bool,
    ) {
        self.entry(
            if is_error { "warn" } else { "info" },
            "tool",
            "result",
            Some(json!({
                "tool_id": tool_id,
                "tool_name": tool_name,
                "output": truncate(output, TRUNCATE_LIMIT),
                "output_length": output.chars().count(),
                "is_error": is_error,
                "duration_ms": duration_ms,
                "offloaded": offloaded,
            })),
        );
    }

    pub fn conversation_pruned(&self, report: &PruneReport) {
        self.entry(
            "warn",
            "session",
            "pruned",
            Some(json!({
                "removed_messages": report.removed_messages,
                "images_demoted": report.images_demoted,
                "chars_before": report.chars_before,
                "chars_after": report.chars_after,
            })),
        );
    }

    pub fn extension_hello(&self, hello: &ExtensionHelloPayload) {
        self.entry(
            "info",
            "extension",
            "hello",
            Some(json!({
                "manifest_version": hello.manifest_version,
                "build_hash": hello.build_hash,
                "user_agent": hello.user_agent,
            })),
        );
    }

    pub fn extension_connected(&self) {
        self.entry("info", "extension", "connected", None);
    }

    pub fn extension_disconnected(&self) {
        self.entry("warn", "extension", "disconnected", None);
    }

    pub fn extension_log(&self, log: &ExtensionLogPayload) {
        let mut data = json!({ "message": log.message });
        if let Some(extra) = &log.data {
            data["data"] = extra.clone();
        }
        self.entry(
            log.level.as_str(),
            "extension",
            &format!("ext:{}", log.category),
            Some(data),
        );
    }

    pub fn debug(&self, event: &str, data: Option<Value>) {
        self.entry("debug", "session", event, data);
    }
}

async fn write_lines(dir: PathBuf, path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    let opened = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::File::create(&path).await
    }
    .await;
    let mut file = match opened {
        Ok(file) => file,
        Err(e) => {
            warn!("event log {} unavailable: {e}", path.display());
            return;
        }
    };

    while let Some(line) = rx.recv().await {
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("write failed for {}: {e}", path.display());
        }
    }
}

/// Hands out one logger per session plus the connection-level `_orchestrator` log.
pub struct LogManager {
    dir: Option<PathBuf>,
    global: SessionLogger,
}

impl LogManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let global = SessionLogger::open(&dir, GLOBAL_LOG);
        Self {
            dir: Some(dir),
            global,
        }
    }

    /// A manager whose loggers discard everything.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            global: SessionLogger::disabled(),
        }
    }

    pub fn create(&self, session_id: &str) -> SessionLogger {
        match &self.dir {
            Some(dir) => SessionLogger::open(dir, session_id),
            None => SessionLogger::disabled(),
        }
    }

    pub fn global(&self) -> &SessionLogger {
        &self.global
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}
