use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::catalog::tool_catalog;
use super::{ArtifactStore, Tool, ToolContext, ToolResult};
use crate::providers::ToolDefinition;

/// Output longer than this many characters is written to the artifact store.
pub const OFFLOAD_THRESHOLD: usize = 10_000;
const PREVIEW_LINES: usize = 20;

/// Prefix of every offload summary.
pub const OFFLOAD_PREFIX: &str = "Output saved to: ";

/// Maps tool names to executors.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ToolRegistry {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            tools: HashMap::new(),
            artifacts,
        }
    }

    /// Register an executor; a later registration under the same name replaces it.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        info!("registered tool: {name}");
        self.tools.insert(name, tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Catalog schemas for the tools that have an executor, in catalog order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        tool_catalog()
            .into_iter()
            .filter(|def| self.tools.contains_key(&def.name))
            .collect()
    }

    /// Run a tool. Never fails: every failure is reported as an error result.
    pub async fn execute(
        &self,
        context: &ToolContext,
        tool_id: &str,
        name: &str,
        input: Value,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(tool_id, format!("Unknown tool: {name}"));
        };

        let output = match tool.execute(context, input).await {
            Ok(output) => output,
            Err(e) => return ToolResult::error(tool_id, e.to_string()),
        };

        let chars = output.content.chars().count();
        if chars <= OFFLOAD_THRESHOLD {
            return ToolResult {
                tool_id: tool_id.to_string(),
                output: output.content,
                is_error: false,
                image: output.image,
                offloaded: false,
            };
        }

        match self
            .artifacts
            .save(name, "txt", output.content.as_bytes())
            .await
        {
            Ok(path) => {
                info!("{name} output offloaded: {chars} chars -> {}", path.display());
                ToolResult {
                    tool_id: tool_id.to_string(),
                    output: offload_summary(&path, &output.content),
                    is_error: false,
                    image: output.image,
                    offloaded: true,
                }
            }
            Err(e) => {
                warn!("failed to offload {name} output: {e}");
                ToolResult::error(
                    tool_id,
                    format!("Output of {chars} characters could not be saved: {e}"),
                )
            }
        }
    }
}

/// The text that replaces offloaded output in the conversation.
pub fn offload_summary(path: &Path, output: &str) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    let line_count = lines.len();
    let shown = line_count.min(PREVIEW_LINES);
    let trailer = if line_count > PREVIEW_LINES {
        format!("\n... {} more lines in file", line_count - PREVIEW_LINES)
    } else {
        String::new()
    };

    [
        format!("{OFFLOAD_PREFIX}{}", path.display()),
        format!("Size: {} bytes, {line_count} lines", output.len()),
        String::new(),
        format!("Preview (first {shown} lines):"),
        lines[..shown].join("\n"),
        trailer,
    ]
    .join("\n")
}
