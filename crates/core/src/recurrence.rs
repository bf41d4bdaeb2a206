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

//! Adaptive recurrence: re-runs weak branches while uncertainty stays high.
//!
//! The control decisions live in [`transition`], a pure function over a
//! [`LoopView`]; [`run_recurrence`] performs the side effects each state asks
//! for. The loop always terminates: every refinement increments the pass
//! count and `Evaluate` stops once the count reaches the allowed depth.

use crate::branches::{call_branch, BranchKind, BranchOutput, BranchSet};
use crate::budget::ReasoningBudget;
use crate::config::{PipelineConfig, Thresholds};
use crate::decomposer::TriStructurePack;
use crate::interpreter::parse_payload;
use crate::logging::{log_degraded_response, log_recurrence_transition};
use crate::payloads::{BranchPayload, RefinementPlanPayload};
use crate::pipeline::{Stage, StageContext, StageEvent};
use crate::prompts;
use crate::scratchpad::{EntryKind, Scratchpad, ScratchpadEntry};
use crate::utils::{bullet_list, clamp_unit, truncate_chars};
use crate::verification::{self, VerificationResult};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::{debug, info};

/// Marks the user content of a refinement call.
pub const REFINEMENT_MARKER: &str = "REFINEMENT PASS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Uncertainty below threshold with no weak points.
    Confident,
    /// Depth budget used up; the outputs are accepted as they are.
    DepthExhausted,
    NoWeakBranches,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RecurrenceState {
    Evaluate,
    SelectWeak,
    Refine(Vec<BranchKind>),
    Stop(StopReason),
}

impl RecurrenceState {
    pub fn name(&self) -> &'static str {
        match self {
            RecurrenceState::Evaluate => "evaluate",
            RecurrenceState::SelectWeak => "select_weak",
            RecurrenceState::Refine(_) => "refine",
            RecurrenceState::Stop(_) => "stop",
        }
    }
}

/// Everything a transition may look at.
#[derive(Debug, Clone, Copy)]
pub struct LoopView<'a> {
    pub verification: &'a VerificationResult,
    pub outputs: &'a BranchSet,
    pub recurrence_count: u32,
    pub allowed_depth: u32,
    pub thresholds: &'a Thresholds,
}

pub fn transition(state: &RecurrenceState, view: &LoopView<'_>) -> RecurrenceState {
    match state {
        RecurrenceState::Evaluate => {
            let verification = view.verification;
            if verification.uncertainty_score < view.thresholds.uncertainty_stop
                && verification.weak_points.is_empty()
            {
                RecurrenceState::Stop(StopReason::Confident)
            } else if view.recurrence_count >= view.allowed_depth {
                RecurrenceState::Stop(StopReason::DepthExhausted)
            } else {
                RecurrenceState::SelectWeak
            }
        }
        RecurrenceState::SelectWeak => {
            let weak = select_weak_branches(view.verification, view.outputs, view.thresholds.weak_score);
            if weak.is_empty() {
                RecurrenceState::Stop(StopReason::NoWeakBranches)
            } else {
                RecurrenceState::Refine(weak)
            }
        }
        // Refinement and re-verification have happened by the time this is asked.
        RecurrenceState::Refine(_) => RecurrenceState::Evaluate,
        RecurrenceState::Stop(reason) => RecurrenceState::Stop(*reason),
    }
}

/// A branch is weak when its score (its own confidence if the verifier gave
/// none) is below `weak_score`, or when a weak point mentions its name.
///
/// The name match is a plain case-sensitive substring test, so a weak point
/// that says "code" in passing also selects the code branch.
pub fn select_weak_branches(
    verification: &VerificationResult,
    outputs: &BranchSet,
    weak_score: f64,
) -> Vec<BranchKind> {
    outputs
        .iter()
        .filter(|(kind, output)| {
            let score = verification
                .branch_scores
                .get(*kind)
                .copied()
                .unwrap_or(output.confidence);
            score < weak_score
                || verification
                    .weak_points
                    .iter()
                    .any(|point| point.contains(kind.name()))
        })
        .map(|(kind, _)| *kind)
        .collect()
}

pub fn boosted(confidence: f64, thresholds: &Thresholds) -> f64 {
    clamp_unit(
        (confidence + thresholds.confidence_boost).min(thresholds.confidence_cap),
        thresholds.confidence_cap,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceOutcome {
    pub outputs: BranchSet,
    pub verification: VerificationResult,
    pub recurrence_count: u32,
    pub stop_reason: StopReason,
}

pub async fn run_recurrence(
    ctx: &StageContext<'_>,
    prompt: &str,
    tri_pack: &TriStructurePack,
    budget: &ReasoningBudget,
    mut outputs: BranchSet,
    mut verification: VerificationResult,
    scratchpad: &Scratchpad,
) -> RecurrenceOutcome {
    let thresholds = &ctx.config.thresholds;
    let mut recurrence_count = 0u32;
    let mut state = RecurrenceState::Evaluate;

    loop {
        let next = transition(
            &state,
            &LoopView {
                verification: &verification,
                outputs: &outputs,
                recurrence_count,
                allowed_depth: budget.allowed_depth,
                thresholds,
            },
        );
        log_recurrence_transition(
            state.name(),
            next.name(),
            recurrence_count,
            verification.uncertainty_score,
        );
        ctx.emit(|| StageEvent::Recurrence {
            recurrence_count,
            state: next.clone(),
        });

        match next {
            RecurrenceState::Stop(stop_reason) => {
                info!(
                    ?stop_reason,
                    recurrence_count,
                    uncertainty = verification.uncertainty_score,
                    "Recurrence stopped"
                );
                return RecurrenceOutcome {
                    outputs,
                    verification,
                    recurrence_count,
                    stop_reason,
                };
            }
            RecurrenceState::Refine(weak) => {
                refine(ctx, prompt, tri_pack, &mut outputs, &verification, &weak, scratchpad).await;
                recurrence_count += 1;
                verification =
                    verification::verify(ctx, prompt, tri_pack, &outputs, scratchpad).await;
                ctx.emit(|| StageEvent::Verified {
                    pass: recurrence_count,
                    result: verification.clone(),
                });
                state = RecurrenceState::Refine(weak);
            }
            other => state = other,
        }
    }
}

pub fn refinement_plan_request(
    prompt: &str,
    verification: &VerificationResult,
    outputs: &BranchSet,
    weak: &[BranchKind],
) -> String {
    let mut request = format!("## Original request\n{prompt}\n\n## Weak branches\n");
    for kind in weak {
        let Some(output) = outputs.get(kind) else {
            continue;
        };
        let score = verification
            .branch_scores
            .get(kind)
            .copied()
            .unwrap_or(output.confidence);
        let _ = writeln!(request, "### {kind} (score {score:.2})");
        request.push_str(&bullet_list(&output.hypotheses));
        request.push('\n');
    }
    request.push_str("\n## Weak points\n");
    request.push_str(&bullet_list(&verification.weak_points));
    request.push_str("\n\n## Counterexamples\n");
    request.push_str(&bullet_list(&verification.counterexamples));
    request
}

pub fn refinement_context(
    base_context: &str,
    previous: &BranchOutput,
    counterexamples: &[String],
    instruction: &str,
) -> String {
    let notes = if previous.notes.trim().is_empty() {
        "(none)"
    } else {
        previous.notes.trim()
    };
    format!(
        "{REFINEMENT_MARKER} for the {} branch.\nInstruction: {instruction}\n\n\
         ## Your previous notes\n{notes}\n\n\
         ## Your previous hypotheses\n{}\n\n\
         ## Counterexamples to address\n{}\n\n{base_context}",
        previous.branch,
        bullet_list(&previous.hypotheses),
        bullet_list(counterexamples),
    )
}

/// Result of a refinement call. A reply without a payload keeps the previous
/// findings; the boost applies either way.
pub fn refined_output(previous: &BranchOutput, raw: &str, thresholds: &Thresholds) -> (BranchOutput, bool) {
    match parse_payload::<BranchPayload>(raw) {
        Some(payload) => {
            let mut refined = BranchOutput::from_payload(previous.branch, payload);
            refined.confidence = boosted(refined.confidence, thresholds);
            (refined, true)
        }
        None => {
            let mut kept = previous.clone();
            kept.confidence = boosted(previous.confidence, thresholds);
            (kept, false)
        }
    }
}

async fn refine_branch(
    ctx: &StageContext<'_>,
    previous: BranchOutput,
    user: String,
    scratchpad: &Scratchpad,
) -> BranchOutput {
    let config: &PipelineConfig = ctx.config;
    let raw = call_branch(ctx, previous.branch, user).await;
    let (refined, parsed) = refined_output(&previous, &raw, &config.thresholds);

    if parsed {
        scratchpad.record_branch(&refined).await;
    } else {
        log_degraded_response(Stage::Recurrence.as_str(), previous.branch.name(), raw.len());
        let excerpt = truncate_chars(raw.trim(), config.evidence.degraded_hypothesis_chars);
        if !excerpt.is_empty() {
            scratchpad
                .append(ScratchpadEntry::new(previous.branch, EntryKind::Note, excerpt))
                .await;
        }
    }

    debug!(
        branch = refined.branch.name(),
        parsed,
        confidence = refined.confidence,
        "Branch refined"
    );
    refined
}

async fn refine(
    ctx: &StageContext<'_>,
    prompt: &str,
    tri_pack: &TriStructurePack,
    outputs: &mut BranchSet,
    verification: &VerificationResult,
    weak: &[BranchKind],
    scratchpad: &Scratchpad,
) {
    let plan = parse_payload::<RefinementPlanPayload>(
        &ctx.call(
            Stage::Recurrence,
            &ctx.config.models.utility,
            prompts::REFINEMENT_PLANNER,
            refinement_plan_request(prompt, verification, outputs, weak),
            ctx.config.budgets.refinement_plan,
        )
        .await,
    )
    .unwrap_or_default();

    let counterexamples: Vec<String> = verification
        .counterexamples
        .iter()
        .take(ctx.config.evidence.max_counterexamples)
        .cloned()
        .collect();
    let base_context = tri_pack.context_block(prompt);

    info!(
        weak = ?weak.iter().map(BranchKind::name).collect::<Vec<_>>(),
        "Refining weak branches"
    );
    let refinements = weak
        .iter()
        .filter_map(|kind| outputs.get(kind).cloned())
        .map(|previous| {
            let user = refinement_context(
                &base_context,
                &previous,
                &counterexamples,
                plan.instruction_for(previous.branch.name()),
            );
            refine_branch(ctx, previous, user, scratchpad)
        });

    for refined in join_all(refinements).await {
        outputs.insert(refined.branch, refined);
    }
}
