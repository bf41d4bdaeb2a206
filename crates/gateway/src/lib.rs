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

//! Concrete inference gateway for the dendrite pipeline.
//!
//! [`ProviderGateway`] routes each request to the provider serving its model
//! id, applies a per-call deadline and folds every failure into the inline
//! error marker. [`ScriptedGateway`] replays canned responses for tests and
//! offline runs.

pub mod providers;
pub mod router;
pub mod scripted;
pub mod settings;

pub use providers::{AnthropicClient, ApiClient, OpenAIClient};
pub use router::ProviderGateway;
pub use scripted::ScriptedGateway;
pub use settings::settings_from_env;

pub use llm_contracts::{
    error_marker, is_error_marker, GatewaySettings, InferenceGateway, InferenceRequest,
    LLMError, LLMResult, Provider, ProviderConfig, TextStream,
};
