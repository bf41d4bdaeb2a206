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

use crate::budget::{Complexity, ReasoningBudget, TaskType, Tier};
use crate::interpreter::parse_payload;
use crate::logging::log_degraded_response;
use crate::payloads::ProfilePayload;
use crate::pipeline::{Stage, StageContext};
use crate::prompts;
use crate::utils::clamp_unit;
use tracing::info;

const DEFAULT_RISK: f64 = 0.5;

/// Classifies the request and allocates its reasoning budget. An
/// uninterpretable reply yields [`ReasoningBudget::fallback`].
pub async fn profile(ctx: &StageContext<'_>, prompt: &str, tier: Tier) -> ReasoningBudget {
    let ceiling = ctx.config.depth_ceiling(tier);
    let chief_model = ctx.config.tiers.get(tier).chief_model.clone();
    let model = ctx.config.models.utility.as_str();

    let raw = ctx
        .call(
            Stage::Profile,
            model,
            prompts::PROFILER,
            format!("Tier: {tier}\n\nRequest:\n{prompt}"),
            ctx.config.budgets.profiler,
        )
        .await;

    let budget = match parse_payload::<ProfilePayload>(&raw) {
        Some(payload) => budget_from_payload(payload, ceiling, chief_model),
        None => {
            log_degraded_response(Stage::Profile.as_str(), model, raw.len());
            ReasoningBudget::fallback(ceiling, chief_model)
        }
    };

    info!(%tier, budget = %budget.summary(), "Task profiled");
    budget
}

/// Applies defaults and the tier's depth ceiling to a parsed profile.
pub fn budget_from_payload(
    payload: ProfilePayload,
    depth_ceiling: u32,
    chief_model: String,
) -> ReasoningBudget {
    let allowed_depth = payload
        .allowed_depth
        .map_or(depth_ceiling, |depth| clamp_depth(depth, depth_ceiling));

    let requested_branches = payload.required_branches.unwrap_or_else(|| {
        ReasoningBudget::DEFAULT_BRANCHES
            .iter()
            .map(|kind| kind.name().to_string())
            .collect()
    });

    ReasoningBudget {
        task_type: TaskType::from_label(&payload.task_type).unwrap_or(TaskType::Reasoning),
        complexity: Complexity::from_label(&payload.complexity).unwrap_or(Complexity::Medium),
        risk_score: clamp_unit(payload.risk_score.unwrap_or(DEFAULT_RISK), DEFAULT_RISK),
        allowed_depth,
        requested_branches,
        chief_model,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_depth(depth: f64, ceiling: u32) -> u32 {
    let ceiling = ceiling.max(1);
    depth.round().clamp(1.0, f64::from(ceiling)) as u32
}
