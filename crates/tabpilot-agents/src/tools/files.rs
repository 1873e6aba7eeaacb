use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tabpilot_common::{Error, Result};

use super::{Tool, ToolContext, ToolOutput, non_empty_str, required_str};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<ToolOutput> {
        let path = non_empty_str(&input, "path", "read_file")?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {path}: {e}")))?;
        Ok(ToolOutput::text(content))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<ToolOutput> {
        let path = non_empty_str(&input, "path", "write_file")?;
        let content = required_str(&input, "content", "write_file")?;

        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Tool(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {path}: {e}")))?;

        Ok(ToolOutput::text(format!(
            "Written {} bytes to {path}",
            content.len()
        )))
    }
}

/// Replaces a string that must occur exactly once.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<ToolOutput> {
        let path = non_empty_str(&input, "path", "edit_file")?;
        let old_string = non_empty_str(&input, "old_string", "edit_file")?;
        let new_string = required_str(&input, "new_string", "edit_file")?;

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {path}: {e}")))?;

        match content.matches(old_string).count() {
            0 => Err(Error::Tool(format!("old_string not found in {path}"))),
            1 => {
                let updated = content.replacen(old_string, new_string, 1);
                tokio::fs::write(path, updated)
                    .await
                    .map_err(|e| Error::Tool(format!("Failed to write {path}: {e}")))?;
                Ok(ToolOutput::text(format!("Edited {path}")))
            }
            n => Err(Error::Tool(format!(
                "old_string appears {n} times in {path}, must be unique"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ToolContext {
        ToolContext {
            session_id: "test".into(),
        }
    }

    #[tokio::test]
    async fn write_creates_parents_then_read_returns_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/hello.txt");
        let path_str = path.to_str().unwrap();

        let written = WriteFileTool
            .execute(&context(), json!({"path": path_str, "content": "hi there"}))
            .await
            .unwrap();
        assert_eq!(written.content, format!("Written 8 bytes to {path_str}"));

        let read = ReadFileTool
            .execute(&context(), json!({"path": path_str}))
            .await
            .unwrap();
        assert_eq!(read.content, "hi there");
    }

    #[tokio::test]
    async fn edit_requires_exactly_one_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("style.css");
        std::fs::write(&path, "a { color: red }\nb { color: red }\nc { color: blue }").unwrap();
        let path_str = path.to_str().unwrap();

        let err = EditFileTool
            .execute(
                &context(),
                json!({"path": path_str, "old_string": "red", "new_string": "green"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("appears 2 times"));

        let err = EditFileTool
            .execute(
                &context(),
                json!({"path": path_str, "old_string": "purple", "new_string": "green"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        EditFileTool
            .execute(
                &context(),
                json!({"path": path_str, "old_string": "blue", "new_string": "green"}),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "a { color: red }\nb { color: red }\nc { color: green }"
        );
    }

    #[tokio::test]
    async fn reading_a_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        let err = ReadFileTool
            .execute(&context(), json!({"path": path.to_str().unwrap()}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to read"));
    }
}
