use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use tabpilot_common::{Error, Result};
use tracing::debug;

use super::{
    ChatMessage, ContentBlock, LlmProvider, LlmRequest, LlmResponse, LlmStream, MessagePart,
    StreamEvent, ToolResultContent, Usage,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn create_request_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": process_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema
                    }))
                    .collect::<Vec<_>>()
            );
        }

        body
    }
}

fn image_json(media_type: &str, data: &str) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type,
            "data": data
        }
    })
}

fn process_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let content = match &msg.content {
                MessagePart::Text(text) => json!(text),
                MessagePart::Parts(parts) => {
                    json!(parts.iter().map(process_block).collect::<Vec<_>>())
                }
            };
            json!({
                "role": msg.role.as_str(),
                "content": content
            })
        })
        .collect()
}

fn process_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({
            "type": "text",
            "text": text
        }),
        ContentBlock::Image { source } => image_json(&source.media_type, &source.base64),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let content = match content {
                ToolResultContent::Text(text) => json!(text),
                ToolResultContent::TextWithImage { text, image } => json!([
                    { "type": "text", "text": text },
                    image_json(&image.media_type, &image.base64),
                ]),
            };
            json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error
            })
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = self.create_request_body(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "Anthropic API error ({status}): {error_text}"
            )));
        }

        let state = SseState {
            body: response.bytes_stream().boxed(),
            buffer: Vec::new(),
            assembler: ResponseAssembler::default(),
            finished: false,
        };

        let s = stream::try_unfold(state, |mut state: SseState| async move {
            loop {
                if state.finished {
                    return Ok(None);
                }

                if let Some(i) = state.buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = state.buffer.drain(0..=i).collect();
                    let line = String::from_utf8_lossy(&line_bytes).trim().to_string();

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let json = match serde_json::from_str::<Value>(data.trim()) {
                        Ok(json) => json,
                        Err(e) => {
                            debug!("skipping unparsable sse data: {e}");
                            continue;
                        }
                    };
                    let Some(event) = parse_anthropic_event(&json) else {
                        continue;
                    };
                    if let Some(out) = state.assembler.apply(event)? {
                        state.finished = matches!(out, StreamEvent::Completed(_));
                        return Ok(Some((out, state)));
                    }
                    continue;
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Err(Error::Agent(format!("Network error: {e}"))),
                    None => {
                        return Err(Error::Agent(
                            "completion stream ended before message_stop".to_string(),
                        ));
                    }
                }
            }
        });

        Ok(Box::pin(s))
    }
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    assembler: ResponseAssembler,
    finished: bool,
}

/// Raw server-sent events of the Messages API.
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    MessageStart { model: String, usage: Option<Usage> },
    BlockStart { index: u32, block: PartialBlock },
    TextDelta { index: u32, text: String },
    InputJsonDelta { index: u32, partial_json: String },
    BlockStop,
    MessageDelta { stop_reason: Option<String>, output_tokens: Option<u32> },
    MessageStop,
    Ping,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq)]
enum PartialBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

fn parse_anthropic_event(json: &Value) -> Option<SseEvent> {
    let index = json["index"].as_u64().unwrap_or(0) as u32;
    match json["type"].as_str().unwrap_or_default() {
        "message_start" => {
            let message = &json["message"];
            let usage = message["usage"].as_object().map(|u| Usage {
                input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            });
            Some(SseEvent::MessageStart {
                model: message["model"].as_str().unwrap_or_default().to_string(),
                usage,
            })
        }
        "content_block_start" => {
            let block = &json["content_block"];
            let block = match block["type"].as_str().unwrap_or_default() {
                "text" => PartialBlock::Text(block["text"].as_str().unwrap_or_default().to_string()),
                "tool_use" => PartialBlock::ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    json: String::new(),
                },
                _ => return None,
            };
            Some(SseEvent::BlockStart { index, block })
        }
        "content_block_delta" => {
            let delta = &json["delta"];
            match delta["type"].as_str().unwrap_or_default() {
                "text_delta" => Some(SseEvent::TextDelta {
                    index,
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                }),
                "input_json_delta" => Some(SseEvent::InputJsonDelta {
                    index,
                    partial_json: delta["partial_json"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                }),
                _ => None,
            }
        }
        "content_block_stop" => Some(SseEvent::BlockStop),
        "message_delta" => Some(SseEvent::MessageDelta {
            stop_reason: json["delta"]["stop_reason"].as_str().map(|s| s.to_string()),
            output_tokens: json["usage"]["output_tokens"].as_u64().map(|t| t as u32),
        }),
        "message_stop" => Some(SseEvent::MessageStop),
        "ping" => Some(SseEvent::Ping),
        "error" => Some(SseEvent::Error {
            message: json["error"]["message"]
                .as_str()
                .unwrap_or("unknown stream error")
                .to_string(),
        }),
        _ => None,
    }
}

/// Folds the event sequence into text deltas and the final response.
#[derive(Debug, Default)]
struct ResponseAssembler {
    model: String,
    usage: Option<Usage>,
    stop_reason: Option<String>,
    blocks: BTreeMap<u32, PartialBlock>,
}

impl ResponseAssembler {
    fn apply(&mut self, event: SseEvent) -> Result<Option<StreamEvent>> {
        match event {
            SseEvent::MessageStart { model, usage } => {
                self.model = model;
                self.usage = usage;
            }
            SseEvent::BlockStart { index, block } => {
                self.blocks.insert(index, block);
            }
            SseEvent::TextDelta { index, text } => {
                if let Some(PartialBlock::Text(buf)) = self.blocks.get_mut(&index) {
                    buf.push_str(&text);
                } else {
                    self.blocks.insert(index, PartialBlock::Text(text.clone()));
                }
                return Ok(Some(StreamEvent::TextDelta(text)));
            }
            SseEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(PartialBlock::ToolUse { json, .. }) = self.blocks.get_mut(&index) {
                    json.push_str(&partial_json);
                }
            }
            SseEvent::MessageDelta {
                stop_reason,
                output_tokens,
            } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if let Some(tokens) = output_tokens {
                    self.usage.get_or_insert_with(Usage::default).output_tokens = tokens;
                }
            }
            SseEvent::MessageStop => return self.finish().map(|r| Some(StreamEvent::Completed(r))),
            SseEvent::Error { message } => {
                return Err(Error::Agent(format!("Anthropic stream error: {message}")));
            }
            SseEvent::BlockStop | SseEvent::Ping => {}
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<LlmResponse> {
        let blocks = std::mem::take(&mut self.blocks);
        let content = blocks
            .into_values()
            .map(|block| match block {
                PartialBlock::Text(text) => Ok(ContentBlock::Text { text }),
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&json).map_err(|e| {
                            Error::Agent(format!("invalid input for tool {name}: {e}"))
                        })?
                    };
                    Ok(ContentBlock::ToolUse { id, name, input })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LlmResponse {
            content,
            model: std::mem::take(&mut self.model),
            usage: self.usage,
            stop_reason: self.stop_reason.take(),
        })
    }
}
