use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;

/// One transcript entry, as exchanged with the browser client and sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One model step: free text plus zero or more tool invocations.
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl LLMResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], tools: Option<&[ToolSchema]>)
    -> Result<LLMResponse>;
}

pub fn create_provider(model: &str, config: &Config) -> Result<Box<dyn LLMProvider>> {
    let max_tokens = config.agent.max_tokens;

    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        let openai_config = config
            .providers
            .openai
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OpenAI provider not configured"))?;

        Ok(Box::new(OpenAIProvider::new(
            &openai_config.api_key,
            &openai_config.base_url,
            model,
            max_tokens,
        )?))
    } else if model.starts_with("claude-") {
        let anthropic_config = config
            .providers
            .anthropic
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Anthropic provider not configured"))?;

        Ok(Box::new(AnthropicProvider::new(
            &anthropic_config.api_key,
            &anthropic_config.base_url,
            model,
            max_tokens,
        )?))
    } else {
        anyhow::bail!("Unknown model or provider not configured: {}", model)
    }
}

/// Turn a non-2xx response into an error carrying the upstream body.
async fn check_status(response: reqwest::Response, provider: &str) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        anyhow::bail!("{} API error ({}): {}", provider, status, body);
    }
    if let Some(error) = body.get("error")
        && !error.is_null()
    {
        anyhow::bail!("{} API error: {}", provider, error);
    }

    Ok(body)
}

// OpenAI Provider
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: usize,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, base_url: &str, model: &str, max_tokens: usize) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect()
    }

    fn format_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut msg = json!({
                    "role": m.role.as_str(),
                    "content": m.content
                });

                if let Some(ref tool_calls) = m.tool_calls {
                    msg["tool_calls"] = json!(
                        tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments
                                    }
                                })
                            })
                            .collect::<Vec<_>>()
                    );
                }

                if let Some(ref tool_call_id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(tool_call_id);
                }

                msg
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        let mut body = json!({
            "model": self.model,
            "max_completion_tokens": self.max_tokens,
            "messages": self.format_messages(messages)
        });

        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = json!(self.format_tools(tools));
        }

        debug!("OpenAI request: {}", serde_json::to_string_pretty(&body)?);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_body = check_status(response, "OpenAI").await?;
        debug!(
            "OpenAI response: {}",
            serde_json::to_string_pretty(&response_body)?
        );

        let message = &response_body["choices"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?["message"];

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = response_body.get("usage").map(|u| Usage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        });

        Ok(LLMResponse {
            text: message["content"].as_str().unwrap_or("").to_string(),
            tool_calls,
            usage,
        })
    }
}

// Anthropic Provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: usize,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, base_url: &str, model: &str, max_tokens: usize) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }

    fn format_tools(&self, tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect()
    }

    /// Split out the system prompt and fold consecutive tool results into a
    /// single user message, which the Messages API requires after a tool_use turn.
    fn format_messages(&self, messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_prompt = None;
        let mut formatted: Vec<Value> = Vec::new();
        let mut pending_results: Vec<Value> = Vec::new();

        for m in messages {
            if m.role != Role::Tool && !pending_results.is_empty() {
                formatted.push(json!({
                    "role": "user",
                    "content": std::mem::take(&mut pending_results)
                }));
            }

            match m.role {
                Role::System => {
                    system_prompt = Some(m.content.clone());
                }
                Role::User => {
                    formatted.push(json!({
                        "role": "user",
                        "content": m.content
                    }));
                }
                Role::Assistant => {
                    if let Some(ref tool_calls) = m.tool_calls {
                        let mut blocks: Vec<Value> = Vec::new();
                        if !m.content.is_empty() {
                            blocks.push(json!({"type": "text", "text": m.content}));
                        }
                        blocks.extend(tool_calls.iter().map(|tc| {
                            json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": serde_json::from_str::<Value>(&tc.arguments).unwrap_or(json!({}))
                            })
                        }));
                        formatted.push(json!({
                            "role": "assistant",
                            "content": blocks
                        }));
                    } else if !m.content.trim().is_empty() {
                        formatted.push(json!({
                            "role": "assistant",
                            "content": m.content
                        }));
                    }
                }
                Role::Tool => {
                    if let Some(ref tool_call_id) = m.tool_call_id {
                        pending_results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": m.content
                        }));
                    }
                }
            }
        }

        if !pending_results.is_empty() {
            formatted.push(json!({
                "role": "user",
                "content": pending_results
            }));
        }

        (system_prompt, formatted)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSchema]>,
    ) -> Result<LLMResponse> {
        let (system_prompt, formatted_messages) = self.format_messages(messages);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": formatted_messages
        });

        if let Some(system) = system_prompt {
            body["system"] = json!(system);
        }

        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = json!(self.format_tools(tools));
        }

        debug!(
            "Anthropic request: {}",
            serde_json::to_string_pretty(&body)?
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let response_body = check_status(response, "Anthropic").await?;
        debug!(
            "Anthropic response: {}",
            serde_json::to_string_pretty(&response_body)?
        );

        let content = response_body["content"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("No content in response"))?;

        let tool_calls: Vec<ToolCall> = content
            .iter()
            .filter(|c| c["type"] == "tool_use")
            .map(|c| ToolCall {
                id: c["id"].as_str().unwrap_or("").to_string(),
                name: c["name"].as_str().unwrap_or("").to_string(),
                arguments: serde_json::to_string(&c["input"]).unwrap_or("{}".to_string()),
            })
            .collect();

        let text = content
            .iter()
            .filter(|c| c["type"] == "text")
            .map(|c| c["text"].as_str().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("");

        let usage = response_body.get("usage").map(|u| Usage {
            input_tokens: u["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: u["output_tokens"].as_u64().unwrap_or(0),
        });

        Ok(LLMResponse {
            text,
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anthropic() -> AnthropicProvider {
        AnthropicProvider::new("key", "http://localhost", "claude-test", 1024).unwrap()
    }

    #[test]
    fn anthropic_groups_consecutive_tool_results() {
        let messages = vec![
            Message {
                role: Role::System,
                content: "be a designer".to_string(),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::user("pricing page"),
            Message {
                role: Role::Assistant,
                content: "Here are two".to_string(),
                tool_calls: Some(vec![
                    ToolCall {
                        id: "t1".to_string(),
                        name: "generateVariant".to_string(),
                        arguments: r#"{"id":"A"}"#.to_string(),
                    },
                    ToolCall {
                        id: "t2".to_string(),
                        name: "generateVariant".to_string(),
                        arguments: r#"{"id":"B"}"#.to_string(),
                    },
                ]),
                tool_call_id: None,
            },
            Message::tool_result("t1", "{}"),
            Message::tool_result("t2", "{}"),
        ];

        let (system, formatted) = anthropic().format_messages(&messages);
        assert_eq!(system.as_deref(), Some("be a designer"));
        assert_eq!(formatted.len(), 3);

        let assistant_blocks = formatted[1]["content"].as_array().unwrap();
        assert_eq!(assistant_blocks[0]["type"], "text");
        assert_eq!(assistant_blocks[1]["type"], "tool_use");
        assert_eq!(assistant_blocks[1]["input"]["id"], "A");

        let results = formatted[2]["content"].as_array().unwrap();
        assert_eq!(formatted[2]["role"], "user");
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "t2");
    }

    #[test]
    fn anthropic_skips_empty_assistant_text() {
        let messages = vec![
            Message::user("a pricing page"),
            Message::assistant(""),
            Message::user("devs"),
        ];

        let (_, formatted) = anthropic().format_messages(&messages);
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0]["content"], "a pricing page");
        assert_eq!(formatted[1]["content"], "devs");
        assert!(formatted.iter().all(|m| m["role"] == "user"));
    }

    #[test]
    fn openai_formats_tool_messages() {
        let provider = OpenAIProvider::new("key", "http://localhost", "gpt-test", 1024).unwrap();
        let formatted = provider.format_messages(&[Message::tool_result("call-1", "ok")]);
        assert_eq!(formatted[0]["role"], "tool");
        assert_eq!(formatted[0]["tool_call_id"], "call-1");
    }

    #[test]
    fn message_wire_format_is_camel_case() {
        let message: Message = serde_json::from_str(
            r#"{"role":"tool","content":"{}","toolCallId":"abc"}"#,
        )
        .unwrap();
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("abc"));

        let user: Message = serde_json::from_str(r#"{"role":"user"}"#).unwrap();
        assert!(user.content.is_empty());
    }

    #[test]
    fn create_provider_requires_configuration() {
        let config = Config::default();
        assert!(create_provider("claude-sonnet-4-20250514", &config).is_err());
        assert!(create_provider("gpt-4o", &config).is_err());
        assert!(create_provider("mystery-model", &config).is_err());
    }
}
