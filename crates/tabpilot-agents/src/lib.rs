pub mod logging;
pub mod manager;
pub mod outbound;
pub mod prompt;
pub mod providers;
pub mod pruning;
pub mod session;
pub mod tools;

pub use logging::{LogManager, SessionLogger};
pub use manager::SessionManager;
pub use outbound::Outbound;
pub use providers::{
    AnthropicProvider, ChatMessage, ChatRole, ContentBlock, ImageData, LlmProvider, LlmRequest,
    LlmResponse, LlmStream, MessagePart, StreamEvent, ToolDefinition, ToolResultContent, Usage,
};
pub use pruning::{PruneReport, prune_conversation};
pub use session::{AgentContext, AgentSettings, Session, Turn};
pub use tools::{
    ArtifactStore, BrowserLink, FsArtifactStore, Tool, ToolContext, ToolOutput, ToolRegistry,
    ToolResult,
};
