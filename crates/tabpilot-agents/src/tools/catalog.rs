use serde_json::json;
use tabpilot_common::BrowserCommandName;

use crate::providers::ToolDefinition;

/// Schemas for every tool the agent can be offered.
pub fn tool_catalog() -> Vec<ToolDefinition> {
    let commands: Vec<&str> = BrowserCommandName::ALL.iter().map(|c| c.as_str()).collect();

    vec![
        ToolDefinition {
            name: "bash".to_string(),
            description: "Execute a shell command on the host OS. Returns stdout and stderr."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "timeout_ms": {
                        "type": "number",
                        "description": "Timeout in milliseconds (default: 30000)"
                    }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a file at the given path.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or workspace-relative file path"
                    }
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file, creating it if it does not exist and \
                          overwriting if it does."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or workspace-relative file path"
                    },
                    "content": {
                        "type": "string",
                        "description": "The content to write"
                    }
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "edit_file".to_string(),
            description: "Replace an exact string in a file with a new string. The old_string \
                          must appear exactly once in the file."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute or workspace-relative file path"
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The exact string to find and replace"
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The replacement string"
                    }
                },
                "required": ["path", "old_string", "new_string"]
            }),
        },
        ToolDefinition {
            name: "browser".to_string(),
            description: format!(
                "Execute a command in the user's browser via the extension. Available commands: {}.",
                commands.join(", ")
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "enum": commands,
                        "description": "The browser command to execute"
                    },
                    "args": {
                        "type": "object",
                        "description": "Command-specific arguments. screenshot: {}. console_logs: {}. \
                            network_logs: {}. inject_script: { code: string }. inject_style: { css: string }. \
                            read_dom: { selector: string }. get_url: {}. navigate: { url: string }. \
                            open_tab: { url: string, active?: boolean }. \
                            open_window: { url: string, incognito?: boolean }. \
                            All URL args accept http://, https://, and file:// schemes."
                    }
                },
                "required": ["command"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_schema_enumerates_every_command() {
        let catalog = tool_catalog();
        let browser = catalog.iter().find(|d| d.name == "browser").unwrap();
        let listed = browser.input_schema["properties"]["command"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(listed.len(), BrowserCommandName::ALL.len());
        assert!(browser.description.contains("open_window"));
    }

    #[test]
    fn every_schema_is_an_object_with_required_fields() {
        for def in tool_catalog() {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
            assert!(def.input_schema["required"].is_array(), "{}", def.name);
        }
    }
}
