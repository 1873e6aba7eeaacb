use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pseudo-session used for connection-level traffic (browser commands, hello, logs).
pub const SYSTEM_SESSION: &str = "system";

/// Every frame exchanged with the peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    #[serde(rename = "session.create")]
    SessionCreate,
    #[serde(rename = "session.message")]
    SessionMessage,
    #[serde(rename = "session.cancel")]
    SessionCancel,
    #[serde(rename = "session.chunk")]
    SessionChunk,
    #[serde(rename = "session.toolUse")]
    SessionToolUse,
    #[serde(rename = "session.toolResult")]
    SessionToolResult,
    #[serde(rename = "session.done")]
    SessionDone,
    #[serde(rename = "session.error")]
    SessionError,
    #[serde(rename = "browser.command")]
    BrowserCommand,
    #[serde(rename = "browser.result")]
    BrowserResult,
    #[serde(rename = "storage.getAssets")]
    StorageGetAssets,
    #[serde(rename = "storage.assets")]
    StorageAssets,
    #[serde(rename = "extension.hello")]
    ExtensionHello,
    #[serde(rename = "extension.log")]
    ExtensionLog,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreate => "session.create",
            Self::SessionMessage => "session.message",
            Self::SessionCancel => "session.cancel",
            Self::SessionChunk => "session.chunk",
            Self::SessionToolUse => "session.toolUse",
            Self::SessionToolResult => "session.toolResult",
            Self::SessionDone => "session.done",
            Self::SessionError => "session.error",
            Self::BrowserCommand => "browser.command",
            Self::BrowserResult => "browser.result",
            Self::StorageGetAssets => "storage.getAssets",
            Self::StorageAssets => "storage.assets",
            Self::ExtensionHello => "extension.hello",
            Self::ExtensionLog => "extension.log",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a payload struct to the one message type that carries it.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageType;
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    pub fn new<P: Payload>(session_id: impl Into<String>, payload: &P) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            kind: P::KIND,
            // Payload structs are plain objects with string keys, which always serialize.
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Parse a raw text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload as `P`, refusing payloads that belong to another message type.
    pub fn parse_payload<P: Payload>(&self) -> Result<P> {
        if self.kind != P::KIND {
            return Err(Error::Transport(format!(
                "expected {} payload, message is {}",
                P::KIND,
                self.kind
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatePayload {
    pub domain: String,
    #[serde(default)]
    pub url: String,
}

impl Payload for SessionCreatePayload {
    const KIND: MessageType = MessageType::SessionCreate;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMessagePayload {
    pub content: String,
}

impl Payload for SessionMessagePayload {
    const KIND: MessageType = MessageType::SessionMessage;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionCancelPayload {}

impl Payload for SessionCancelPayload {
    const KIND: MessageType = MessageType::SessionCancel;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionChunkPayload {
    pub delta: String,
}

impl Payload for SessionChunkPayload {
    const KIND: MessageType = MessageType::SessionChunk;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionToolUsePayload {
    pub tool_name: String,
    pub tool_id: String,
    pub input: serde_json::Value,
}

impl Payload for SessionToolUsePayload {
    const KIND: MessageType = MessageType::SessionToolUse;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionToolResultPayload {
    pub tool_id: String,
    pub output: String,
    pub is_error: bool,
}

impl Payload for SessionToolResultPayload {
    const KIND: MessageType = MessageType::SessionToolResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDonePayload {
    pub full_text: String,
}

impl Payload for SessionDonePayload {
    const KIND: MessageType = MessageType::SessionDone;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionErrorPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl SessionErrorPayload {
    pub const SESSION_NOT_FOUND: &'static str = "SESSION_NOT_FOUND";
}

impl Payload for SessionErrorPayload {
    const KIND: MessageType = MessageType::SessionError;
}

/// Commands the browser-side executor understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BrowserCommandName {
    Screenshot,
    ConsoleLogs,
    NetworkLogs,
    InjectScript,
    InjectStyle,
    ReadDom,
    GetUrl,
    Navigate,
    OpenTab,
    OpenWindow,
}

impl BrowserCommandName {
    pub const ALL: [BrowserCommandName; 10] = [
        Self::Screenshot,
        Self::ConsoleLogs,
        Self::NetworkLogs,
        Self::InjectScript,
        Self::InjectStyle,
        Self::ReadDom,
        Self::GetUrl,
        Self::Navigate,
        Self::OpenTab,
        Self::OpenWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::ConsoleLogs => "console_logs",
            Self::NetworkLogs => "network_logs",
            Self::InjectScript => "inject_script",
            Self::InjectStyle => "inject_style",
            Self::ReadDom => "read_dom",
            Self::GetUrl => "get_url",
            Self::Navigate => "navigate",
            Self::OpenTab => "open_tab",
            Self::OpenWindow => "open_window",
        }
    }
}

impl fmt::Display for BrowserCommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserCommandName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::Tool(format!("unknown browser command: {s}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserCommandPayload {
    pub command: BrowserCommandName,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Payload for BrowserCommandPayload {
    const KIND: MessageType = MessageType::BrowserCommand;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserResultPayload {
    pub command_id: String,
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Payload for BrowserResultPayload {
    const KIND: MessageType = MessageType::BrowserResult;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageGetAssetsPayload {
    pub domain: String,
}

impl Payload for StorageGetAssetsPayload {
    const KIND: MessageType = MessageType::StorageGetAssets;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedAsset {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageAssetsPayload {
    pub domain: String,
    pub scripts: Vec<NamedAsset>,
    pub styles: Vec<NamedAsset>,
}

impl Payload for StorageAssetsPayload {
    const KIND: MessageType = MessageType::StorageAssets;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionHelloPayload {
    pub manifest_version: String,
    pub build_hash: String,
    pub user_agent: String,
}

impl Payload for ExtensionHelloPayload {
    const KIND: MessageType = MessageType::ExtensionHello;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionLogPayload {
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Payload for ExtensionLogPayload {
    const KIND: MessageType = MessageType::ExtensionLog;
}
