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

use crate::requests::InferenceRequest;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub type TextStream = BoxStream<'static, String>;

/// Opaque boundary to the inference provider.
///
/// Implementations never fail towards the caller: transport and provider
/// errors come back as text produced by [`error_marker`], which downstream
/// parsing treats like any other unstructured reply.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn invoke(&self, request: InferenceRequest) -> String;

    /// Streams the reply in chunks whose concatenation equals what
    /// [`InferenceGateway::invoke`] would have returned.
    async fn invoke_streaming(&self, request: InferenceRequest) -> TextStream;

    /// Whether a model id can be routed to a provider at all.
    fn supports(&self, _model: &str) -> bool {
        true
    }
}

pub fn error_marker(model: &str, message: &str) -> String {
    format!("[Error calling {model}: {message}]")
}

pub fn is_error_marker(text: &str) -> bool {
    text.starts_with("[Error calling ") && text.ends_with(']')
}
