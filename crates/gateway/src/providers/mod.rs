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

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, ProviderRequest, ProviderResponse, StreamChunk};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

pub type ChunkReceiver = mpsc::UnboundedReceiver<LLMResult<StreamChunk>>;

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    async fn send_streaming_request(&self, request: ProviderRequest) -> LLMResult<ChunkReceiver>;

    fn provider_name(&self) -> &'static str;
}

pub use anthropic::AnthropicClient;
pub use openai::OpenAIClient;

/// What a single server-sent `data:` payload means to the stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Splits raw body bytes into complete lines.
///
/// Bytes are held until a newline arrives, so a multi-byte character split
/// across network chunks is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(line_end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=line_end).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Reads an SSE body line by line and forwards the decoded deltas.
///
/// The channel always ends with either a final chunk or an error.
pub(crate) fn forward_sse(
    response: reqwest::Response,
    request_id: Uuid,
    tx: mpsc::UnboundedSender<LLMResult<StreamChunk>>,
    decode: fn(&Value) -> SseEvent,
) {
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();

        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(Err(LLMError::Network(format!("Stream interrupted: {e}"))));
                    return;
                }
            };
            for line in buffer.push(&chunk) {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                let event = if data == "[DONE]" {
                    SseEvent::Done
                } else {
                    serde_json::from_str::<Value>(data)
                        .map(|parsed| decode(&parsed))
                        .unwrap_or(SseEvent::Skip)
                };

                match event {
                    SseEvent::Delta(text) => {
                        if tx.send(Ok(StreamChunk::delta(request_id, text))).is_err() {
                            debug!("Stream receiver dropped, abandoning SSE body");
                            return;
                        }
                    }
                    SseEvent::Done => {
                        let _ = tx.send(Ok(StreamChunk::last(request_id)));
                        return;
                    }
                    SseEvent::Skip => {}
                }
            }
        }

        let _ = tx.send(Ok(StreamChunk::last(request_id)));
    });
}

pub(crate) fn build_http_client(timeout: std::time::Duration) -> LLMResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis(250 * 2_u64.pow(attempt.min(4)))
}
