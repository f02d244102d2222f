use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};
use super::{
    CompletionFuture, Message, MessageRole, Provider, ProviderCompletion, ProviderFuture,
    ProviderResponse, ProviderUsage, ToolSpec, format_error_parts, system_text,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    temperature: Option<f32>,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Claude {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    fn base_body(&self) -> Value {
        let messages = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::User)
            .map(|message| {
                json!({
                    "role": "user",
                    "content": [{"type": "text", "text": message.content}]
                })
            })
            .collect::<Vec<_>>();
        let system = system_text(&self.messages);

        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
        });
        if !system.trim().is_empty() {
            body["system"] = json!(system);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

impl Provider for Claude {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self
                .find_tool(&tool_name)
                .cloned()
                .ok_or_else(|| anyhow!("tool '{}' not registered", tool_name))?;
            let mut body = self.base_body();
            body["tools"] = json!([
                {
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters
                }
            ]);
            body["tool_choice"] = json!({"type": "tool", "name": tool.name});
            let text = post_messages(&self.key, &body).await?;
            extract_tool_response(&text, &tool_name, &self.model)
        })
    }

    fn complete(self) -> CompletionFuture {
        Box::pin(async move {
            let body = self.base_body();
            let text = post_messages(&self.key, &body).await?;
            extract_completion(&text, &self.model)
        })
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn post_messages(key: &str, body: &Value) -> Result<String> {
    let client = reqwest::Client::new();
    let url = base_url();
    debug!("POST {}", url);

    let mut attempt = 0usize;
    let mut delay = RATE_LIMIT_BASE_DELAY;
    loop {
        attempt += 1;
        let response = client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(text);
        }
        if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
            delay = wait_with_backoff("Claude", attempt, delay, retry_after).await;
            continue;
        }
        return Err(anyhow!(
            "Claude API error ({}): {}",
            status,
            extract_claude_error(&text).unwrap_or(text)
        ));
    }
}

fn parse_response(text: &str) -> Result<ClaudeResponse> {
    serde_json::from_str(text).map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))
}

fn extract_tool_response(
    text: &str,
    tool_name: &str,
    fallback_model: &str,
) -> Result<ProviderResponse> {
    let payload = parse_response(text)?;
    let block = payload
        .content
        .iter()
        .find(|block| block.kind == "tool_use" && block.name.as_deref() == Some(tool_name))
        .ok_or_else(|| anyhow!("no tool call returned from Claude"))?;
    let args = block
        .input
        .clone()
        .ok_or_else(|| anyhow!("Claude tool_use missing input"))?;
    Ok(ProviderResponse {
        args,
        model: response_model(payload.model, fallback_model),
        usage: payload.usage.map(ClaudeUsage::into_usage),
    })
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderCompletion> {
    let payload = parse_response(text)?;
    let content = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");
    if content.trim().is_empty() {
        return Err(anyhow!("no text content returned from Claude"));
    }
    Ok(ProviderCompletion {
        text: content.trim().to_string(),
        model: response_model(payload.model, fallback_model),
        usage: payload.usage.map(ClaudeUsage::into_usage),
    })
}

fn response_model(model: Option<String>, fallback_model: &str) -> Option<String> {
    model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()))
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl ClaudeUsage {
    fn into_usage(self) -> ProviderUsage {
        ProviderUsage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self
                .input_tokens
                .zip(self.output_tokens)
                .map(|(input, output)| input + output),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    input: Option<Value>,
    text: Option<String>,
}
