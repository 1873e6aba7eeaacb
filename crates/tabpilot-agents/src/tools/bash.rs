use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tabpilot_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::{Tool, ToolContext, ToolOutput, non_empty_str};

pub const DEFAULT_BASH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-stream cap on captured output. The rest is read and discarded.
pub const MAX_BASH_OUTPUT_BYTES: usize = 1024 * 1024;

/// Runs a command through `sh -c`. The child is killed when the timeout expires.
pub struct BashTool {
    default_timeout: Duration,
    max_output_bytes: usize,
}

impl BashTool {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            max_output_bytes: MAX_BASH_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

/// Captured bytes of one pipe, and whether anything past the cap was dropped.
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn render(&self, label: &str, limit: usize) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.bytes);
        Some(if self.truncated {
            format!("{label}:\n{text}\n[{label} truncated at {limit} bytes]")
        } else {
            format!("{label}:\n{text}")
        })
    }
}

async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    limit: usize,
) -> std::io::Result<Captured> {
    let Some(mut pipe) = pipe else {
        return Ok(Captured {
            bytes: Vec::new(),
            truncated: false,
        });
    };
    let mut bytes = Vec::new();
    (&mut pipe).take(limit as u64 + 1).read_to_end(&mut bytes).await?;
    let truncated = bytes.len() > limit;
    if truncated {
        bytes.truncate(limit);
        // Keep draining so the child never blocks on a full pipe.
        tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    }
    Ok(Captured { bytes, truncated })
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new(DEFAULT_BASH_TIMEOUT)
    }
}

#[async_trait]
impl Tool for BashTool {
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<ToolOutput> {
        let command = non_empty_str(&input, "command", "bash")?;
        let timeout = input
            .get("timeout_ms")
            .and_then(Value::as_f64)
            .filter(|ms| *ms > 0.0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(self.default_timeout);

        debug!(session = %context.session_id, "bash: {command}");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("Failed to spawn command: {e}")))?;

        let limit = self.max_output_bytes;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let run = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout_pipe, limit),
                read_capped(stderr_pipe, limit)
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| {
                Error::Tool(format!(
                    "Command timed out after {}ms: {command}",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| Error::Tool(format!("Failed to run command: {e}")))?;

        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        if !status.success() && stdout.bytes.is_empty() && stderr.bytes.is_empty() {
            return Err(Error::Tool(format!(
                "Command failed with exit code {code}: {command}"
            )));
        }

        let parts = [
            stdout.render("stdout", limit),
            stderr.render("stderr", limit),
            Some(format!("exit code: {code}")),
        ];
        Ok(ToolOutput::text(
            parts.into_iter().flatten().collect::<Vec<_>>().join("\n"),
        ))
    }
}
