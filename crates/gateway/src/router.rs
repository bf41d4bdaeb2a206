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

use crate::providers::{AnthropicClient, ApiClient, ChunkReceiver, OpenAIClient};
use async_trait::async_trait;
use futures::StreamExt;
use llm_contracts::{
    error_marker, GatewaySettings, InferenceGateway, InferenceRequest, LLMError, LLMResult,
    Provider, ProviderRequest, TextStream,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{timeout, timeout_at};
use tracing::{debug, info, warn};

/// Gateway over real providers.
///
/// Every call is bounded by the configured deadline; failures of any kind
/// come back as the inline error marker rather than as an `Err`.
pub struct ProviderGateway {
    clients: HashMap<Provider, Arc<dyn ApiClient>>,
    default_provider: Option<Provider>,
    call_timeout: Duration,
}

impl ProviderGateway {
    pub fn from_settings(settings: &GatewaySettings) -> LLMResult<Self> {
        let call_timeout = Duration::from_secs(settings.call_timeout_seconds.max(1));
        let mut gateway = Self::empty(call_timeout);

        if let Some(config) = &settings.anthropic {
            let client = AnthropicClient::new(config, call_timeout)?;
            gateway = gateway.with_client(Provider::Anthropic, Arc::new(client));
        }
        if let Some(config) = &settings.openai {
            let client = OpenAIClient::new(config, call_timeout)?;
            gateway = gateway.with_client(Provider::OpenAI, Arc::new(client));
        }

        if gateway.clients.is_empty() {
            return Err(LLMError::Configuration(
                "No inference provider configured; set ANTHROPIC_API_KEY or OPENAI_API_KEY"
                    .to_string(),
            ));
        }

        gateway.default_provider = settings
            .default_provider
            .filter(|p| gateway.clients.contains_key(p))
            .or_else(|| settings.configured_providers().first().copied());

        info!(
            providers = ?gateway.clients.keys().map(Provider::as_str).collect::<Vec<_>>(),
            default_provider = ?gateway.default_provider,
            timeout_secs = call_timeout.as_secs(),
            "Inference gateway initialised"
        );
        Ok(gateway)
    }

    pub fn empty(call_timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            default_provider: None,
            call_timeout,
        }
    }

    pub fn with_client(mut self, provider: Provider, client: Arc<dyn ApiClient>) -> Self {
        if self.default_provider.is_none() {
            self.default_provider = Some(provider);
        }
        self.clients.insert(provider, client);
        self
    }

    fn route(&self, model: &str) -> Option<&Arc<dyn ApiClient>> {
        match Provider::for_model(model) {
            Some(provider) => self.clients.get(&provider),
            None => self
                .default_provider
                .and_then(|provider| self.clients.get(&provider)),
        }
    }

    fn timeout_message(&self) -> String {
        LLMError::Timeout {
            seconds: self.call_timeout.as_secs(),
        }
        .to_string()
    }

    async fn open_stream(
        &self,
        request: &InferenceRequest,
        deadline: tokio::time::Instant,
    ) -> Result<ChunkReceiver, String> {
        let client = self
            .route(&request.model)
            .ok_or_else(|| format!("no provider configured for model '{}'", request.model))?;

        match timeout_at(
            deadline,
            client.send_streaming_request(ProviderRequest::from(request)),
        )
        .await
        {
            Ok(Ok(rx)) => Ok(rx),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(self.timeout_message()),
        }
    }
}

#[async_trait]
impl InferenceGateway for ProviderGateway {
    async fn invoke(&self, request: InferenceRequest) -> String {
        let Some(client) = self.route(&request.model) else {
            warn!(model = %request.model, "No provider can serve model");
            return error_marker(&request.model, "no provider configured for model");
        };

        let started = Instant::now();
        let outcome = timeout(
            self.call_timeout,
            client.send_request(ProviderRequest::from(&request)),
        )
        .await;

        match outcome {
            Ok(Ok(response)) => {
                debug!(
                    model = %request.model,
                    provider = client.provider_name(),
                    completion_tokens = response.usage.completion_tokens,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Inference call completed"
                );
                response.content
            }
            Ok(Err(e)) => {
                warn!(model = %request.model, error = %e, "Inference call failed");
                error_marker(&request.model, &e.to_string())
            }
            Err(_) => {
                warn!(model = %request.model, "Inference call timed out");
                error_marker(&request.model, &self.timeout_message())
            }
        }
    }

    /// One deadline covers opening the stream and every chunk after it.
    async fn invoke_streaming(&self, request: InferenceRequest) -> TextStream {
        let deadline = tokio::time::Instant::now() + self.call_timeout;
        let model = request.model.clone();
        let timeout_text = self.timeout_message();

        let rx = match self.open_stream(&request, deadline).await {
            Ok(rx) => rx,
            Err(message) => {
                warn!(model = %model, error = %message, "Streaming call failed to open");
                return futures::stream::once(async move { error_marker(&model, &message) })
                    .boxed();
            }
        };

        futures::stream::unfold(Some(rx), move |state| {
            let model = model.clone();
            let timeout_text = timeout_text.clone();
            async move {
                let mut rx = state?;
                loop {
                    match timeout_at(deadline, rx.recv()).await {
                        Ok(Some(Ok(chunk))) if chunk.is_final => return None,
                        Ok(Some(Ok(chunk))) => {
                            if !chunk.content_delta.is_empty() {
                                return Some((chunk.content_delta, Some(rx)));
                            }
                        }
                        Ok(Some(Err(e))) => {
                            warn!(model = %model, error = %e, "Streaming call failed");
                            return Some((error_marker(&model, &e.to_string()), None));
                        }
                        Ok(None) => return None,
                        Err(_) => {
                            warn!(model = %model, "Streaming call timed out");
                            return Some((error_marker(&model, &timeout_text), None));
                        }
                    }
                }
            }
        })
        .boxed()
    }

    fn supports(&self, model: &str) -> bool {
        self.route(model).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{is_error_marker, ProviderConfig, ProviderResponse, StreamChunk, Usage};
    use tokio::sync::mpsc;

    struct Canned {
        reply: LLMResult<String>,
        delay: Duration,
    }

    #[async_trait]
    impl ApiClient for Canned {
        async fn send_request(
            &self,
            request: ProviderRequest,
        ) -> LLMResult<ProviderResponse> {
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Ok(text) => Ok(ProviderResponse {
                    content: text.clone(),
                    model: request.model,
                    usage: Usage::default(),
                    finish_reason: None,
                    raw_response: serde_json::Value::Null,
                }),
                Err(e) => Err(LLMError::Provider(e.to_string())),
            }
        }

        async fn send_streaming_request(
            &self,
            _request: ProviderRequest,
        ) -> LLMResult<ChunkReceiver> {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = uuid::Uuid::new_v4();
            if let Ok(text) = &self.reply {
                for word in text.split_inclusive(' ') {
                    let _ = tx.send(Ok(StreamChunk::delta(id, word)));
                }
                let _ = tx.send(Ok(StreamChunk::last(id)));
            } else {
                let _ = tx.send(Err(LLMError::Network("reset".to_string())));
            }
            Ok(rx)
        }

        fn provider_name(&self) -> &'static str {
            "canned"
        }
    }

    fn gateway(reply: LLMResult<String>, delay: Duration, limit: Duration) -> ProviderGateway {
        ProviderGateway::empty(limit).with_client(Provider::Anthropic, Arc::new(Canned { reply, delay }))
    }

    #[tokio::test]
    async fn returns_content_on_success() {
        let gw = gateway(Ok("fine".into()), Duration::ZERO, Duration::from_secs(1));
        let text = gw
            .invoke(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await;
        assert_eq!(text, "fine");
    }

    #[tokio::test]
    async fn provider_failure_becomes_marker() {
        let gw = gateway(
            Err(LLMError::Provider("boom".into())),
            Duration::ZERO,
            Duration::from_secs(1),
        );
        let text = gw
            .invoke(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await;
        assert!(is_error_marker(&text));
        assert!(text.contains("claude-haiku-4-5"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out_into_marker() {
        let gw = gateway(Ok("late".into()), Duration::from_secs(30), Duration::from_secs(2));
        let text = gw
            .invoke(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await;
        assert!(is_error_marker(&text));
        assert!(text.contains("timed out"));
    }

    /// Slow to open, then slow to deliver its only chunk.
    struct SlowStream {
        open_delay: Duration,
        chunk_delay: Duration,
    }

    #[async_trait]
    impl ApiClient for SlowStream {
        async fn send_request(&self, _request: ProviderRequest) -> LLMResult<ProviderResponse> {
            Err(LLMError::Provider("streaming only".to_string()))
        }

        async fn send_streaming_request(
            &self,
            _request: ProviderRequest,
        ) -> LLMResult<ChunkReceiver> {
            tokio::time::sleep(self.open_delay).await;
            let (tx, rx) = mpsc::unbounded_channel();
            let id = uuid::Uuid::new_v4();
            let gap = self.chunk_delay;
            tokio::spawn(async move {
                tokio::time::sleep(gap).await;
                let _ = tx.send(Ok(StreamChunk::delta(id, "late")));
                let _ = tx.send(Ok(StreamChunk::last(id)));
            });
            Ok(rx)
        }

        fn provider_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stream_open_time_counts_against_the_deadline() {
        let slow = SlowStream {
            open_delay: Duration::from_millis(1500),
            chunk_delay: Duration::from_secs(1),
        };
        let gw = ProviderGateway::empty(Duration::from_secs(2))
            .with_client(Provider::Anthropic, Arc::new(slow));

        let started = tokio::time::Instant::now();
        let chunks: Vec<String> = gw
            .invoke_streaming(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(is_error_marker(&chunks[0]));
        assert!(started.elapsed() < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn unroutable_model_is_unsupported() {
        let gw = gateway(Ok("x".into()), Duration::ZERO, Duration::from_secs(1));
        assert!(gw.supports("claude-opus-4-1"));
        assert!(!gw.supports("gpt-4o"));
        // unknown families fall back to the default provider
        assert!(gw.supports("mistral-large"));

        let text = gw.invoke(InferenceRequest::new("gpt-4o", "s", "u", 10)).await;
        assert!(is_error_marker(&text));
    }

    #[tokio::test]
    async fn streaming_concatenates_to_full_text() {
        let gw = gateway(Ok("one two three".into()), Duration::ZERO, Duration::from_secs(1));
        let chunks: Vec<String> = gw
            .invoke_streaming(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), "one two three");
    }

    #[tokio::test]
    async fn streaming_error_ends_with_marker() {
        let gw = gateway(
            Err(LLMError::Network("x".into())),
            Duration::ZERO,
            Duration::from_secs(1),
        );
        let chunks: Vec<String> = gw
            .invoke_streaming(InferenceRequest::new("claude-haiku-4-5", "s", "u", 10))
            .await
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(is_error_marker(&chunks[0]));
    }

    #[test]
    fn settings_without_providers_are_rejected() {
        let result = ProviderGateway::from_settings(&GatewaySettings::default());
        assert!(matches!(result, Err(LLMError::Configuration(_))));
    }

    #[test]
    fn settings_pick_first_configured_default() {
        let settings = GatewaySettings {
            openai: Some(ProviderConfig::new("sk-test")),
            ..GatewaySettings::default()
        };
        let gw = ProviderGateway::from_settings(&settings).expect("gateway builds");
        assert!(gw.supports("gpt-4o"));
        assert!(gw.supports("some-local-model"));
        assert!(!gw.supports("claude-haiku-4-5"));
    }
}
