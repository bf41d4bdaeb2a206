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
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{backoff, build_http_client, forward_sse, ApiClient, ChunkReceiver, SseEvent};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    endpoint: String,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> LLMResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LLMError::Configuration(
                "Anthropic API key is empty".to_string(),
            ));
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

    fn build_anthropic_payload(&self, request: &ProviderRequest) -> Value {
        let mut system_content = Vec::new();
        let mut regular_messages = Vec::new();

        for msg in &request.messages {
            if msg.role == "system" {
                system_content.push(msg.content.clone());
            } else {
                regular_messages.push(json!({
                    "role": msg.role,
                    "content": msg.content
                }));
            }
        }

        let mut payload = json!({
            "model": request.model,
            "messages": regular_messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });

        if !system_content.is_empty() {
            payload["system"] = json!(system_content.join("\n\n"));
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

    fn parse_anthropic_response(response_data: Value, model: String) -> LLMResult<ProviderResponse> {
        let content = response_data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block["text"].as_str())
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from Anthropic response".to_string())
            })?;

        let usage = response_data.get("usage").map_or_else(Usage::default, |usage_data| {
            Usage::new(
                usage_data["input_tokens"].as_u64().unwrap_or(0) as u32,
                usage_data["output_tokens"].as_u64().unwrap_or(0) as u32,
            )
        });

        let finish_reason = response_data["stop_reason"].as_str().map(str::to_string);

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
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(payload)
    }

    async fn execute_request_with_retry(&self, payload: Value) -> LLMResult<Value> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                "Sending request to Anthropic API"
            );

            match self.post(&payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    info!("Received response from Anthropic API: {}", status);

                    if status.is_success() {
                        return resp.json::<Value>().await.map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse JSON response: {e}"))
                        });
                    } else if status.as_u16() == 429 {
                        warn!("Rate limited by Anthropic API");
                        last_error = Some(LLMError::RateLimit);
                    } else {
                        let error_body = resp
                            .text()
                            .await
                            .unwrap_or_else(|e| format!("failed to read error body: {e}"));
                        last_error = Some(LLMError::Provider(format!(
                            "Anthropic API error {status}: {error_body}"
                        )));
                        if status.is_client_error() {
                            break;
                        }
                    }
                }
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

fn decode_anthropic_event(parsed: &Value) -> SseEvent {
    match parsed["type"].as_str() {
        Some("content_block_delta") => parsed["delta"]["text"]
            .as_str()
            .map_or(SseEvent::Skip, |text| SseEvent::Delta(text.to_string())),
        Some("message_stop") => SseEvent::Done,
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl ApiClient for AnthropicClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let payload = self.build_anthropic_payload(&request);
        let response_data = self.execute_request_with_retry(payload).await?;
        Self::parse_anthropic_response(response_data, request.model)
    }

    async fn send_streaming_request(&self, mut request: ProviderRequest) -> LLMResult<ChunkReceiver> {
        request.stream = Some(true);
        let payload = self.build_anthropic_payload(&request);

        let resp = self
            .post(&payload)
            .send()
            .await
            .map_err(|e| LLMError::Network(format!("Request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Provider(format!(
                "Anthropic API error {status}: {error_body}"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        forward_sse(resp, Uuid::new_v4(), tx, decode_anthropic_event);
        Ok(rx)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
