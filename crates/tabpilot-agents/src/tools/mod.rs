use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tabpilot_common::{Error, Result};

use crate::providers::{ContentBlock, ImageData, ToolResultContent};

pub mod bash;
pub mod browser;
pub mod catalog;
pub mod files;
pub mod registry;

pub use bash::BashTool;
pub use browser::{BrowserLink, BrowserTool, ScreenshotLimiter};
pub use catalog::tool_catalog;
pub use files::{EditFileTool, ReadFileTool, WriteFileTool};
pub use registry::ToolRegistry;

/// Context passed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
}

/// What an executor produced. `content` is always text; a screenshot also carries an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub image: Option<ImageData>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(content: impl Into<String>, image: ImageData) -> Self {
        Self {
            content: content.into(),
            image: Some(image),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<ToolOutput>;
}

/// Outcome of one tool call as recorded in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_id: String,
    pub output: String,
    pub is_error: bool,
    pub image: Option<ImageData>,
    pub offloaded: bool,
}

impl ToolResult {
    pub fn error(tool_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            output: output.into(),
            is_error: true,
            image: None,
            offloaded: false,
        }
    }

    pub fn into_block(self) -> ContentBlock {
        let content = match self.image {
            Some(image) => ToolResultContent::TextWithImage {
                text: self.output,
                image,
            },
            None => ToolResultContent::Text(self.output),
        };
        ContentBlock::ToolResult {
            tool_use_id: self.tool_id,
            content,
            is_error: self.is_error,
        }
    }
}

/// Side-channel storage for offloaded output and screenshots.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` under a unique name derived from `stem` and return its location.
    async fn save(&self, stem: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf>;
}

pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, stem: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!(
            "{stem}-{}-{}.{extension}",
            chrono::Utc::now().timestamp_millis(),
            &suffix[..8]
        );
        let path = self.dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

pub(crate) fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// A string argument that must be present; empty strings are allowed.
pub(crate) fn required_str<'a>(input: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    optional_str(input, key)
        .ok_or_else(|| Error::Tool(format!("{tool} requires a '{key}' argument")))
}

/// A string argument that must be present and non-empty.
pub(crate) fn non_empty_str<'a>(input: &'a Value, key: &str, tool: &str) -> Result<&'a str> {
    match optional_str(input, key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Tool(format!("{tool} requires a '{key}' argument"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn argument_helpers_report_missing_keys() {
        let input = json!({"path": "", "content": ""});
        assert_eq!(required_str(&input, "content", "write_file").unwrap(), "");
        let err = non_empty_str(&input, "path", "read_file").unwrap_err();
        assert_eq!(err.to_string(), "read_file requires a 'path' argument");
        assert!(required_str(&input, "command", "bash").is_err());
    }

    #[test]
    fn image_results_become_text_with_image_blocks() {
        let image = ImageData {
            media_type: "image/jpeg".into(),
            base64: "AA".into(),
        };
        let result = ToolResult {
            tool_id: "t".into(),
            output: "shot".into(),
            is_error: false,
            image: Some(image.clone()),
            offloaded: false,
        };
        assert_eq!(
            result.into_block(),
            ContentBlock::ToolResult {
                tool_use_id: "t".into(),
                content: ToolResultContent::TextWithImage {
                    text: "shot".into(),
                    image
                },
                is_error: false,
            }
        );
    }

    #[tokio::test]
    async fn artifact_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        let a = store.save("read_dom", "txt", b"one").await.unwrap();
        let b = store.save("read_dom", "txt", b"two").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "one");
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("read_dom-")
        );
    }
}
