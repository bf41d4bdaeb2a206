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

use crate::branches::{BranchKind, BranchSet};
use crate::config::EvidenceLimits;
use crate::decomposer::TriStructurePack;
use crate::interpreter::parse_payload;
use crate::logging::log_degraded_response;
use crate::payloads::{CounterexamplePayload, ScoringPayload, DEFAULT_CONFIDENCE, DEFAULT_UNCERTAINTY};
use crate::pipeline::{Stage, StageContext};
use crate::prompts;
use crate::scratchpad::{Scratchpad, ScratchpadEntry};
use crate::utils::{bullet_list, clamp_unit, truncate_chars};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::info;

/// Outcome of one verification pass. Each pass replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub branch_scores: BTreeMap<BranchKind, f64>,
    pub counterexamples: Vec<String>,
    pub contradictions: Vec<String>,
    pub proven_invariants: Vec<String>,
    pub weak_points: Vec<String>,
    pub uncertainty_score: f64,
    /// The verifier's own estimate before blending.
    pub model_uncertainty: f64,
    pub average_confidence: f64,
}

impl VerificationResult {
    pub fn assemble(
        outputs: &BranchSet,
        counterexamples: CounterexamplePayload,
        scoring: ScoringPayload,
    ) -> Self {
        let model_uncertainty = clamp_unit(scoring.uncertainty_or_default(), DEFAULT_UNCERTAINTY);
        let average_confidence = average_confidence(outputs);

        // Only scores for branches that actually ran are kept.
        let branch_scores = scoring
            .branch_scores
            .into_iter()
            .filter_map(|(name, score)| {
                let kind = BranchKind::from_name(&name)?;
                outputs
                    .contains_key(&kind)
                    .then(|| (kind, clamp_unit(score, DEFAULT_CONFIDENCE)))
            })
            .collect();

        Self {
            branch_scores,
            counterexamples: counterexamples.counterexamples,
            contradictions: aggregate_contradictions(outputs),
            proven_invariants: scoring.proven_invariants,
            weak_points: scoring.weak_points,
            uncertainty_score: blend_uncertainty(model_uncertainty, average_confidence),
            model_uncertainty,
            average_confidence,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "uncertainty={:.2} (model {:.2}, avg confidence {:.2}) weak_points={} counterexamples={}",
            self.uncertainty_score,
            self.model_uncertainty,
            self.average_confidence,
            self.weak_points.len(),
            self.counterexamples.len()
        )
    }
}

/// Mean branch confidence; 0.5 when no branch ran.
#[allow(clippy::cast_precision_loss)]
pub fn average_confidence(outputs: &BranchSet) -> f64 {
    if outputs.is_empty() {
        return DEFAULT_CONFIDENCE;
    }
    outputs.values().map(|o| o.confidence).sum::<f64>() / outputs.len() as f64
}

/// Averages the verifier's estimate with the inverse of branch confidence.
pub fn blend_uncertainty(model_uncertainty: f64, average_confidence: f64) -> f64 {
    clamp_unit(
        (model_uncertainty + (1.0 - average_confidence)) / 2.0,
        DEFAULT_UNCERTAINTY,
    )
}

pub fn aggregate_contradictions(outputs: &BranchSet) -> Vec<String> {
    outputs
        .values()
        .flat_map(|o| o.contradictions.iter().cloned())
        .collect()
}

pub fn build_verification_context(
    prompt: &str,
    tri_pack: &TriStructurePack,
    outputs: &BranchSet,
    recent: &[ScratchpadEntry],
    limits: &EvidenceLimits,
) -> String {
    let mut context = tri_pack.context_block(prompt);

    context.push_str("\n\n## Hypotheses\n");
    let hypotheses = outputs
        .values()
        .flat_map(|o| o.hypotheses.iter().map(move |h| (o.branch, h)));
    let mut count = 0usize;
    for (branch, hypothesis) in hypotheses {
        count += 1;
        let _ = writeln!(context, "{count}. [{branch}] {hypothesis}");
    }
    if count == 0 {
        context.push_str("(none)\n");
    }

    context.push_str("\n## Contradictions\n");
    context.push_str(&bullet_list(&aggregate_contradictions(outputs)));

    context.push_str("\n\n## Recent scratchpad\n");
    let lines: Vec<String> = recent
        .iter()
        .rev()
        .take(limits.verification_entries)
        .rev()
        .map(|entry| {
            format!(
                "[{}] {}",
                entry.branch,
                truncate_chars(&entry.content, limits.verification_entry_chars)
            )
        })
        .collect();
    context.push_str(&bullet_list(&lines));
    context
}

/// Attacks and scores the current branch outputs with two concurrent calls.
pub async fn verify(
    ctx: &StageContext<'_>,
    prompt: &str,
    tri_pack: &TriStructurePack,
    outputs: &BranchSet,
    scratchpad: &Scratchpad,
) -> VerificationResult {
    let limits = &ctx.config.evidence;
    let recent = scratchpad.recent(limits.verification_entries).await;
    let context = build_verification_context(prompt, tri_pack, outputs, &recent, limits);
    let model = ctx.config.models.utility.as_str();

    let (counterexample_raw, scoring_raw) = futures::join!(
        ctx.call(
            Stage::Verify,
            model,
            prompts::COUNTEREXAMPLE_GENERATOR,
            context.clone(),
            ctx.config.budgets.counterexample,
        ),
        ctx.call(
            Stage::Verify,
            model,
            prompts::CONSISTENCY_AUDITOR,
            context,
            ctx.config.budgets.scoring,
        ),
    );

    let counterexamples = parse_payload::<CounterexamplePayload>(&counterexample_raw)
        .unwrap_or_else(|| {
            log_degraded_response("counterexamples", model, counterexample_raw.len());
            CounterexamplePayload::default()
        });
    let scoring = parse_payload::<ScoringPayload>(&scoring_raw).unwrap_or_else(|| {
        log_degraded_response("scoring", model, scoring_raw.len());
        ScoringPayload::default()
    });

    let result = VerificationResult::assemble(outputs, counterexamples, scoring);
    info!(summary = %result.summary(), "Verification complete");
    result
}
