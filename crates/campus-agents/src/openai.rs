use std::time::Duration;

use async_trait::async_trait;
use campus_common::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, ToolDefinition, Usage,
};
use crate::tools::ToolCall;

const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_timeout(api_key, base_url, Duration::from_secs(600))
    }

    pub fn with_timeout(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = convert_request(request);
        debug!(model = %body.model, tools = body.tools.as_ref().map_or(0, Vec::len), "chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(Some(status.as_u16()), error_text));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(None, format!("failed to parse response: {e}")))?;

        convert_response(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::provider(None, format!("request timed out: {err}"))
    } else if err.is_connect() {
        Error::provider(None, format!("connection refused: {err}"))
    } else {
        Error::provider(None, format!("request failed: {err}"))
    }
}

fn convert_request(request: &LlmRequest) -> OpenAiRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(OpenAiMessage {
            role: "system",
            content: system.clone(),
        });
    }
    messages.extend(request.messages.iter().map(convert_message));

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(request.tools.iter().map(convert_tool).collect())
    };

    OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        // tool_choice without tools is rejected by most gateways.
        tool_choice: tools
            .as_ref()
            .and(request.tool_choice.map(|c| c.as_str())),
        tools,
        stream: false,
    }
}

fn convert_message(msg: &ChatMessage) -> OpenAiMessage {
    let role = match msg.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    };
    OpenAiMessage {
        role,
        content: msg.content.clone(),
    }
}

fn convert_tool(tool: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        kind: "function",
        function: OpenAiFunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

fn convert_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider(None, "no choices in response"))?;
    let message = choice.message;

    // Arguments stay raw; decoding failures are a per-call concern.
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(LlmResponse {
        text: message.content.unwrap_or_default(),
        tool_calls,
        reasoning_content: message.reasoning_content.filter(|r| !r.is_empty()),
        model: response.model,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        stop_reason: choice.finish_reason,
    })
}

// Request types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolChoice;
    use serde_json::json;

    fn request(tools: Vec<ToolDefinition>) -> LlmRequest {
        LlmRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("hi")],
            system: Some("sys".to_string()),
            max_tokens: Some(10),
            temperature: Some(0.1),
            tools,
            tool_choice: Some(ToolChoice::Auto),
        }
    }

    #[test]
    fn tool_choice_dropped_without_tools() {
        let body = serde_json::to_value(convert_request(&request(vec![]))).unwrap();
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn tool_choice_sent_with_tools() {
        let body = serde_json::to_value(convert_request(&request(vec![ToolDefinition {
            name: "any_query".to_string(),
            description: "d".to_string(),
            input_schema: json!({"type": "object"}),
        }])))
        .unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "any_query");
    }

    #[test]
    fn response_keeps_raw_arguments() {
        let parsed: OpenAiResponse = serde_json::from_value(json!({
            "model": "m",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "any_query", "arguments": "{not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let response = convert_response(parsed).unwrap();
        assert_eq!(response.tool_calls[0].arguments, "{not json");
        assert!(response.text.is_empty());
    }
}
