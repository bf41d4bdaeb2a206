// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderConfig, ProviderRequest, ProviderResponse, Usage};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{backoff, build_http_client, forward_sse, ApiClient, ChunkReceiver, SseEvent};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> LLMResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LLMError::Configuration("OpenAI API key is empty".to_string()));
        }

        Ok(Self {
            client: build_http_client(timeout)?,
            api_key: config.api_key.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            max_retries: config.max_retries,
        })
    }

    fn build_openai_payload(&self, request: &ProviderRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            }).collect::<Vec<_>>()
        });

        if let Some(max_tokens) = request.max_tokens {
            payload["max_completion_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(stream) = request.stream {
            payload["stream"] = json!(stream);
        }

        for (key, value) in &request.provider_specific {
            payload[key] = value.clone();
        }

        payload
    }

    fn parse_openai_response(response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from OpenAI response".to_string())
            })?
            .to_string();

        let usage = response_data.get("usage").map_or_else(Usage::default, |usage_data| {
            Usage::new(
                usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
            )
        });

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(str::to_string);

        Ok(ProviderResponse {
            content,
            model,
            usage,
            finish_reason,
            raw_response: response_data,
        })
    }

    fn post(&self, payload: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
    }

    async fn execute_request_with_retry(&self, payload: Value) -> LLMResult<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(attempt = attempt + 1, "Sending request to OpenAI API");

            match self.post(&payload).send().await {
                Ok(response) => match response.status() {
                    status if status.is_success() => {
                        return response.json().await.map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse response: {e}"))
                        });
                    }
                    status => {
                        last_error = Some(if status.as_u16() == 429 {
                            LLMError::RateLimit
                        } else {
                            LLMError::Provider(format!(
                                "OpenAI API error {}: {}",
                                status,
                                response
                                    .text()
                                    .await
                                    .unwrap_or_else(|_| "Unknown error".to_string())
                            ))
                        });

                        if status.is_client_error() && status.as_u16() != 429 {
                            break;
                        }
                    }
                },
                Err(e) => {
                    last_error = Some(LLMError::Network(format!("Request failed: {e}")));
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

fn decode_openai_event(parsed: &Value) -> SseEvent {
    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .map_or(SseEvent::Skip, |delta| SseEvent::Delta(delta.to_string()))
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_openai_payload(&request);
        let response_data = self.execute_request_with_retry(payload).await?;
        Self::parse_openai_response(response_data, request.model)
    }

    async fn send_streaming_request(&self, mut request: ProviderRequest) -> LLMResult<ChunkReceiver> {
        request.stream = Some(true);
        let payload = self.build_openai_payload(&request);

        let resp = self
            .post(&payload)
            .send()
            .await
            .map_err(|e| LLMError::Network(format!("Request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Provider(format!(
                "OpenAI API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        forward_sse(resp, Uuid::new_v4(), tx, decode_openai_event);
        Ok(rx)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::InferenceRequest;

    #[test]
    fn keeps_system_message_inline() {
        let client = OpenAIClient::new(&ProviderConfig::new("k"), Duration::from_secs(5))
            .expect("client builds");
        let request =
            ProviderRequest::from(&InferenceRequest::new("gpt-4o", "be brief", "hi", 42));
        let payload = client.build_openai_payload(&request);

        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hi");
        assert_eq!(payload["max_completion_tokens"], 42);
    }

    #[test]
    fn missing_choices_is_a_provider_error() {
        let result = OpenAIClient::parse_openai_response(json!({"error": "x"}), "gpt".into());
        assert!(matches!(result, Err(LLMError::Provider(_))));
    }

    #[test]
    fn decodes_delta_content() {
        let event = json!({"choices": [{"delta": {"content": "abc"}}]});
        assert_eq!(decode_openai_event(&event), SseEvent::Delta("abc".to_string()));
        assert_eq!(decode_openai_event(&json!({"choices": [{"delta": {}}]})), SseEvent::Skip);
    }
}
