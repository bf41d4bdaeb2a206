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

use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEBUG_TARGET: &str = "dendrite::debug";

pub fn log_stage_event(stage: &str, payload: &Value) {
    info!(
        target: DEBUG_TARGET,
        stage = stage,
        payload = %serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()),
        "Stage event"
    );
}
pub fn log_gateway_call(stage: &str, model: &str, max_tokens: u32) {
    debug!(
        stage = stage,
        model = model,
        max_tokens = max_tokens,
        "Gateway call"
    );
}
pub fn log_degraded_response(stage: &str, source: &str, response_chars: usize) {
    warn!(
        stage = stage,
        source = source,
        response_chars = response_chars,
        "Response not interpretable, using fallback"
    );
}
pub fn log_recurrence_transition(from: &str, to: &str, recurrence_count: u32, uncertainty: f64) {
    info!(
        from = from,
        to = to,
        recurrence_count = recurrence_count,
        uncertainty = uncertainty,
        "Recurrence transition"
    );
}
pub fn log_stage_timing(stage: &str, elapsed_ms: u64) {
    debug!(stage = stage, elapsed_ms = elapsed_ms, "Stage finished");
}
