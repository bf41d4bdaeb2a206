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

use llm_contracts::{GatewaySettings, Provider, ProviderConfig, DEFAULT_CALL_TIMEOUT_SECONDS};
use tracing::warn;

/// Builds gateway settings from the process environment.
///
/// Reads `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, the optional
/// `ANTHROPIC_ENDPOINT` / `OPENAI_ENDPOINT` overrides,
/// `DENDRITE_DEFAULT_PROVIDER`, `DENDRITE_CALL_TIMEOUT_SECS` and
/// `DENDRITE_PROVIDER_RETRIES`.
pub fn settings_from_env() -> GatewaySettings {
    settings_from_lookup(|key| std::env::var(key).ok())
}

pub(crate) fn settings_from_lookup<F>(lookup: F) -> GatewaySettings
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let retries = non_empty("DENDRITE_PROVIDER_RETRIES").and_then(|v| v.parse::<u32>().ok());

    let provider = |key_var: &str, endpoint_var: &str| {
        non_empty(key_var).map(|key| {
            let mut config = ProviderConfig::new(key);
            if let Some(endpoint) = non_empty(endpoint_var) {
                config = config.with_endpoint(endpoint);
            }
            if let Some(retries) = retries {
                config.max_retries = retries;
            }
            config
        })
    };

    let call_timeout_seconds = match non_empty("DENDRITE_CALL_TIMEOUT_SECS") {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(value = %raw, "Ignoring unparsable DENDRITE_CALL_TIMEOUT_SECS");
            DEFAULT_CALL_TIMEOUT_SECONDS
        }),
        None => DEFAULT_CALL_TIMEOUT_SECONDS,
    };

    let default_provider = non_empty("DENDRITE_DEFAULT_PROVIDER").and_then(|raw| {
        match raw.parse::<Provider>() {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring unknown DENDRITE_DEFAULT_PROVIDER");
                None
            }
        }
    });

    GatewaySettings {
        anthropic: provider("ANTHROPIC_API_KEY", "ANTHROPIC_ENDPOINT"),
        openai: provider("OPENAI_API_KEY", "OPENAI_ENDPOINT"),
        default_provider,
        call_timeout_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_keys_endpoints_and_timeout() {
        let settings = settings_from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("ANTHROPIC_ENDPOINT", "http://localhost:9000/v1/messages"),
            ("DENDRITE_CALL_TIMEOUT_SECS", "45"),
            ("DENDRITE_PROVIDER_RETRIES", "0"),
        ]));

        let anthropic = settings.anthropic.expect("anthropic configured");
        assert_eq!(anthropic.api_key, "sk-ant");
        assert_eq!(
            anthropic.endpoint.as_deref(),
            Some("http://localhost:9000/v1/messages")
        );
        assert_eq!(anthropic.max_retries, 0);
        assert!(settings.openai.is_none());
        assert_eq!(settings.call_timeout_seconds, 45);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let settings = settings_from_lookup(lookup(&[
            ("OPENAI_API_KEY", "   "),
            ("DENDRITE_CALL_TIMEOUT_SECS", "soon"),
        ]));
        assert!(settings.openai.is_none());
        assert_eq!(settings.call_timeout_seconds, DEFAULT_CALL_TIMEOUT_SECONDS);
    }

    #[test]
    fn default_provider_must_be_a_known_name() {
        let settings = settings_from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DENDRITE_DEFAULT_PROVIDER", "OpenAI"),
        ]));
        assert_eq!(settings.default_provider, Some(Provider::OpenAI));

        let settings = settings_from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("DENDRITE_DEFAULT_PROVIDER", "ollama"),
        ]));
        assert_eq!(settings.default_provider, None);
    }
}
