use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde_json::{Value, json};
use tabpilot_common::{
    BrowserCommandName, BrowserCommandPayload, BrowserResultPayload, Error, Message, Result,
    SYSTEM_SESSION,
};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{ArtifactStore, Tool, ToolContext, ToolOutput, non_empty_str};
use crate::providers::ImageData;

/// The connection to the browser-side executor.
#[async_trait]
pub trait BrowserLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send a `browser.command` and wait for the `browser.result` that answers it.
    async fn send_browser_command(&self, message: Message) -> Result<Message>;
}

const SCREENSHOT_WINDOW: Duration = Duration::from_secs(120);
const BASE_INTERVAL: Duration = Duration::from_secs(5);
const ELEVATED_INTERVAL: Duration = Duration::from_secs(10);
const HIGH_INTERVAL: Duration = Duration::from_secs(20);
const ELEVATED_AFTER: usize = 3;
const HIGH_AFTER: usize = 5;

/// Refusal returned while inside the screenshot cooldown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cooldown {
    pub remaining: Duration,
    pub interval: Duration,
    pub recent: usize,
}

impl Cooldown {
    pub fn advisory(&self) -> String {
        let mut text = format!(
            "Screenshot rate-limited: wait {:.1}s. Use inject_script or read_dom to check page state instead.",
            self.remaining.as_secs_f64()
        );
        if self.interval > BASE_INTERVAL {
            text.push_str(&format!(
                " {} screenshots in the last {}s, so the minimum interval is now {}s.",
                self.recent,
                SCREENSHOT_WINDOW.as_secs(),
                self.interval.as_secs()
            ));
        }
        text
    }
}

/// Sliding-window limiter whose minimum interval grows with recent use.
#[derive(Debug, Default)]
pub struct ScreenshotLimiter {
    accepted: VecDeque<Instant>,
}

impl ScreenshotLimiter {
    fn interval_for(recent: usize) -> Duration {
        if recent >= HIGH_AFTER {
            HIGH_INTERVAL
        } else if recent >= ELEVATED_AFTER {
            ELEVATED_INTERVAL
        } else {
            BASE_INTERVAL
        }
    }

    /// Accept and record a screenshot at `now`, or refuse with the remaining cooldown.
    pub fn try_acquire(&mut self, now: Instant) -> std::result::Result<(), Cooldown> {
        while self
            .accepted
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= SCREENSHOT_WINDOW)
        {
            self.accepted.pop_front();
        }

        let recent = self.accepted.len();
        let interval = Self::interval_for(recent);
        if let Some(last) = self.accepted.back() {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < interval {
                return Err(Cooldown {
                    remaining: interval - elapsed,
                    interval,
                    recent,
                });
            }
        }

        self.accepted.push_back(now);
        Ok(())
    }
}

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:(image/\w+);base64,(.+)$").expect("data url regex should compile")
});

fn parse_data_url(data_url: &str) -> Result<ImageData> {
    let captures = DATA_URL
        .captures(data_url)
        .ok_or_else(|| Error::Tool("Invalid screenshot data URL".to_string()))?;
    Ok(ImageData {
        media_type: captures[1].to_string(),
        base64: captures[2].to_string(),
    })
}

/// Forwards tool calls to the browser over the transport.
pub struct BrowserTool {
    link: Arc<dyn BrowserLink>,
    artifacts: Arc<dyn ArtifactStore>,
    limiter: Mutex<ScreenshotLimiter>,
}

impl BrowserTool {
    pub fn new(link: Arc<dyn BrowserLink>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            link,
            artifacts,
            limiter: Mutex::new(ScreenshotLimiter::default()),
        }
    }

    async fn screenshot_output(&self, data: &str) -> Result<ToolOutput> {
        let image = parse_data_url(data)?;
        let bytes = BASE64
            .decode(image.base64.trim())
            .map_err(|e| Error::Tool(format!("Invalid screenshot data URL: {e}")))?;
        let ext = if image.media_type.contains("jpeg") {
            "jpg"
        } else {
            "png"
        };
        let path = self.artifacts.save("screenshot", ext, &bytes).await?;
        info!("screenshot saved to {}", path.display());

        Ok(ToolOutput::with_image(
            format!(
                "Screenshot captured and attached as image. Also saved to: {}",
                path.display()
            ),
            image,
        ))
    }
}

#[async_trait]
impl Tool for BrowserTool {
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<ToolOutput> {
        let command: BrowserCommandName =
            non_empty_str(&input, "command", "browser")?.parse()?;

        if !self.link.is_connected() {
            return Err(Error::Tool("Browser extension is not connected".to_string()));
        }

        if command == BrowserCommandName::Screenshot {
            let acquired = self
                .limiter
                .lock()
                .map_err(|_| Error::Tool("screenshot limiter poisoned".to_string()))?
                .try_acquire(Instant::now());
            if let Err(cooldown) = acquired {
                debug!(session = %context.session_id, "screenshot refused: {cooldown:?}");
                return Ok(ToolOutput::text(cooldown.advisory()));
            }
        }

        let args = input
            .get("args")
            .filter(|a| a.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let message = Message::new(SYSTEM_SESSION, &BrowserCommandPayload { command, args });

        let reply = self.link.send_browser_command(message).await?;
        let result: BrowserResultPayload = reply.parse_payload()?;

        if !result.success {
            return Err(Error::Tool(
                result
                    .error
                    .unwrap_or_else(|| "Browser command failed".to_string()),
            ));
        }

        match result.data {
            Value::String(data) if command == BrowserCommandName::Screenshot => {
                self.screenshot_output(&data).await
            }
            Value::String(text) => Ok(ToolOutput::text(text)),
            other => Ok(ToolOutput::text(serde_json::to_string_pretty(&other)?)),
        }
    }
}
