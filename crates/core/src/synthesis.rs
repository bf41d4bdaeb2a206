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

use crate::branches::BranchSet;
use crate::budget::{ReasoningBudget, Tier};
use crate::config::EvidenceLimits;
use crate::decomposer::TriStructurePack;
use crate::pipeline::{Stage, StageContext};
use crate::prompts;
use crate::scratchpad::ScratchpadEntry;
use crate::utils::{bullet_list, truncate_chars};
use crate::verification::VerificationResult;
use std::fmt::Write;
use tracing::info;

/// Everything the final answer is built from.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub prompt: &'a str,
    pub tier: Tier,
    pub budget: &'a ReasoningBudget,
    pub tri_pack: &'a TriStructurePack,
    pub outputs: &'a BranchSet,
    pub verification: &'a VerificationResult,
    pub recurrence_count: u32,
    pub recent_entries: &'a [ScratchpadEntry],
}

fn head(items: &[String], n: usize) -> Vec<String> {
    items.iter().take(n).cloned().collect()
}

pub fn build_evidence_ledger(input: &SynthesisInput<'_>, limits: &EvidenceLimits) -> String {
    let mut ledger = String::from("# Evidence ledger\n\n## Task profile\n");
    let _ = writeln!(
        ledger,
        "{} tier={} refinement_passes={}",
        input.budget.summary(),
        input.tier,
        input.recurrence_count
    );

    let excerpt = |text: &str| truncate_chars(text.trim(), limits.tri_pack_excerpt_chars).to_string();
    let _ = write!(
        ledger,
        "\n## Problem views\n### Symbolic\n{}\n### Invariants\n{}\n### Formal\n{}\n",
        excerpt(&input.tri_pack.symbolic),
        excerpt(&input.tri_pack.invariants),
        excerpt(&input.tri_pack.formal),
    );

    ledger.push_str("\n## Branch findings\n");
    for output in input.outputs.values() {
        let _ = writeln!(
            ledger,
            "### {} (confidence {:.2})\nHypotheses:\n{}\nArtifacts:\n{}",
            output.branch,
            output.confidence,
            bullet_list(&head(&output.hypotheses, limits.ledger_hypotheses)),
            bullet_list(&head(&output.artifacts, limits.ledger_artifacts)),
        );
    }

    let verification = input.verification;
    let _ = write!(
        ledger,
        "\n## Verification\nUncertainty: {:.2}\nProven invariants:\n{}\nRemaining weak points:\n{}\nContradictions: {}\n",
        verification.uncertainty_score,
        bullet_list(&verification.proven_invariants),
        bullet_list(&verification.weak_points),
        verification.contradictions.len(),
    );

    let recent: Vec<String> = input
        .recent_entries
        .iter()
        .rev()
        .take(limits.synthesis_entries)
        .rev()
        .map(|entry| format!("[{}] {}", entry.branch, entry.content))
        .collect();
    let _ = write!(ledger, "\n## Recent scratchpad\n{}\n", bullet_list(&recent));
    ledger
}

/// Streams the final answer from the tier's chief model.
pub async fn synthesize(
    ctx: &StageContext<'_>,
    input: &SynthesisInput<'_>,
    on_chunk: &mut (dyn FnMut(&str) + Send),
) -> String {
    let ledger = build_evidence_ledger(input, &ctx.config.evidence);
    let user = format!("{ledger}\n# User request\n{}", input.prompt);
    let max_tokens = ctx.config.tiers.get(input.tier).synthesis_max_tokens;

    info!(
        model = %input.budget.chief_model,
        max_tokens,
        ledger_chars = ledger.len(),
        "Synthesizing final answer"
    );
    ctx.stream(
        Stage::Synthesis,
        &input.budget.chief_model,
        prompts::GRAND_SYNTHESIZER,
        user,
        max_tokens,
        on_chunk,
    )
    .await
}
