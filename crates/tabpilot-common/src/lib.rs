pub mod error;
pub mod message;

pub use error::{Error, Result};
pub use message::{
    BrowserCommandName, BrowserCommandPayload, BrowserResultPayload, ExtensionHelloPayload,
    ExtensionLogPayload, LogLevel, Message, MessageType, NamedAsset, Payload, SYSTEM_SESSION,
    SessionCancelPayload, SessionChunkPayload, SessionCreatePayload, SessionDonePayload,
    SessionErrorPayload, SessionMessagePayload, SessionToolResultPayload, SessionToolUsePayload,
    StorageAssetsPayload, StorageGetAssetsPayload,
};
