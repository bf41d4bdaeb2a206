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
use futures::StreamExt;
use llm_contracts::{InferenceGateway, InferenceRequest, TextStream};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const DEFAULT_FALLBACK: &str = "No scripted response matched this request.";

#[derive(Debug)]
enum Matcher {
    System(String),
    SystemAndUser(String, String),
}

impl Matcher {
    fn matches(&self, request: &InferenceRequest) -> bool {
        match self {
            Matcher::System(fragment) => request.system.contains(fragment.as_str()),
            Matcher::SystemAndUser(system, user) => {
                request.system.contains(system.as_str()) && request.user.contains(user.as_str())
            }
        }
    }
}

#[derive(Debug)]
struct Rule {
    matcher: Matcher,
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl Rule {
    fn new(matcher: Matcher, responses: Vec<String>) -> Self {
        Self {
            matcher,
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
        }
    }

    /// Next scripted response; the final one repeats once the queue drains.
    fn next_response(&self) -> Option<String> {
        let mut queue = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = queue.pop_front() {
            *last = Some(next.clone());
            Some(next)
        } else {
            last.clone()
        }
    }
}

/// Deterministic gateway that answers from a script.
///
/// Rules are checked in insertion order against the request's system
/// instruction (and optionally its user content). Every request is recorded.
#[derive(Debug)]
pub struct ScriptedGateway {
    rules: Vec<Rule>,
    fallback: String,
    unsupported_models: Vec<String>,
    chunk_chars: usize,
    calls: Mutex<Vec<InferenceRequest>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: DEFAULT_FALLBACK.to_string(),
            unsupported_models: Vec::new(),
            chunk_chars: 16,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = text.into();
        self
    }

    pub fn when_system(self, fragment: impl Into<String>, response: impl Into<String>) -> Self {
        self.when_system_sequence(fragment, vec![response.into()])
    }

    pub fn when_system_sequence<S: Into<String>>(
        mut self,
        fragment: impl Into<String>,
        responses: Vec<S>,
    ) -> Self {
        let responses = responses.into_iter().map(Into::into).collect();
        self.rules
            .push(Rule::new(Matcher::System(fragment.into()), responses));
        self
    }

    pub fn when(
        mut self,
        system_fragment: impl Into<String>,
        user_fragment: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule::new(
            Matcher::SystemAndUser(system_fragment.into(), user_fragment.into()),
            vec![response.into()],
        ));
        self
    }

    pub fn with_unsupported_model(mut self, model: impl Into<String>) -> Self {
        self.unsupported_models.push(model.into());
        self
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn calls(&self) -> Vec<InferenceRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_system(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.system.contains(fragment))
            .count()
    }

    fn respond(&self, request: InferenceRequest) -> String {
        let response = self
            .rules
            .iter()
            .filter(|rule| rule.matcher.matches(&request))
            .find_map(Rule::next_response)
            .unwrap_or_else(|| self.fallback.clone());

        debug!(model = %request.model, chars = response.len(), "Scripted response served");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        response
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn invoke(&self, request: InferenceRequest) -> String {
        self.respond(request)
    }

    async fn invoke_streaming(&self, request: InferenceRequest) -> TextStream {
        let response: Vec<char> = self.respond(request).chars().collect();
        let chunks: Vec<String> = response
            .chunks(self.chunk_chars)
            .map(|chunk| chunk.iter().collect())
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    fn supports(&self, model: &str) -> bool {
        !self.unsupported_models.iter().any(|m| m == model)
    }
}
