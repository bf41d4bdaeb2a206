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

use crate::config::PipelineConfig;
use crate::decomposer::TriStructurePack;
use crate::interpreter::parse_payload;
use crate::logging::log_degraded_response;
use crate::payloads::{BranchPayload, DEFAULT_CONFIDENCE};
use crate::pipeline::{Stage, StageContext};
use crate::prompts;
use crate::scratchpad::Scratchpad;
use crate::utils::{clamp_unit, truncate_chars};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// The fixed set of reasoning branches. Ordering is the registry order and
/// drives every merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Logic,
    Pattern,
    World,
    Code,
    Adversarial,
}

impl BranchKind {
    pub const ALL: [BranchKind; 5] = [
        BranchKind::Logic,
        BranchKind::Pattern,
        BranchKind::World,
        BranchKind::Code,
        BranchKind::Adversarial,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BranchKind::Logic => "logic",
            BranchKind::Pattern => "pattern",
            BranchKind::World => "world",
            BranchKind::Code => "code",
            BranchKind::Adversarial => "adversarial",
        }
    }

    /// Total lookup: any name outside the registry is `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn profile<'c>(&self, config: &'c PipelineConfig) -> CapabilityProfile<'c> {
        let (model, role) = match self {
            BranchKind::Logic => (&config.models.logic, prompts::LOGIC_BRANCH),
            BranchKind::Pattern => (&config.models.pattern, prompts::PATTERN_BRANCH),
            BranchKind::World => (&config.models.world, prompts::WORLD_BRANCH),
            BranchKind::Code => (&config.models.code, prompts::CODE_BRANCH),
            BranchKind::Adversarial => (&config.models.adversarial, prompts::ADVERSARIAL_BRANCH),
        };
        CapabilityProfile {
            kind: *self,
            model: model.as_str(),
            instruction: prompts::branch_instruction(role),
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityProfile<'c> {
    pub kind: BranchKind,
    pub model: &'c str,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOutput {
    pub branch: BranchKind,
    pub hypotheses: Vec<String>,
    pub artifacts: Vec<String>,
    pub notes: String,
    pub contradictions: Vec<String>,
    pub confidence: f64,
}

impl BranchOutput {
    pub fn from_payload(branch: BranchKind, payload: BranchPayload) -> Self {
        let confidence = clamp_unit(payload.confidence_or_default(), DEFAULT_CONFIDENCE);
        Self {
            branch,
            hypotheses: payload.hypotheses,
            artifacts: payload.artifacts,
            notes: payload.notes,
            contradictions: payload.contradictions,
            confidence,
        }
    }

    /// Stand-in for a reply that carried no payload: the raw text becomes the
    /// only hypothesis.
    pub fn degraded(branch: BranchKind, raw: &str, max_chars: usize) -> Self {
        let text = truncate_chars(raw.trim(), max_chars);
        Self {
            branch,
            hypotheses: if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            },
            artifacts: Vec::new(),
            notes: String::new(),
            contradictions: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn interpret(branch: BranchKind, raw: &str, config: &PipelineConfig) -> Self {
        match parse_payload::<BranchPayload>(raw) {
            Some(payload) => Self::from_payload(branch, payload),
            None => {
                log_degraded_response(Stage::Branches.as_str(), branch.name(), raw.len());
                Self::degraded(branch, raw, config.evidence.degraded_hypothesis_chars)
            }
        }
    }
}

/// Current output per branch. At most one entry per branch; a later pass
/// replaces the earlier one.
pub type BranchSet = BTreeMap<BranchKind, BranchOutput>;

/// Keys results by branch, so the set is the same whatever order the calls
/// completed in.
pub fn merge_outputs(outputs: impl IntoIterator<Item = BranchOutput>) -> BranchSet {
    outputs
        .into_iter()
        .map(|output| (output.branch, output))
        .collect()
}

pub(crate) async fn call_branch(ctx: &StageContext<'_>, kind: BranchKind, user: String) -> String {
    let profile = kind.profile(ctx.config);
    ctx.call(
        Stage::Branches,
        profile.model,
        &profile.instruction,
        user,
        ctx.config.budgets.branch,
    )
    .await
}

async fn run_branch(
    ctx: &StageContext<'_>,
    kind: BranchKind,
    user: String,
    scratchpad: &Scratchpad,
) -> BranchOutput {
    let raw = call_branch(ctx, kind, user).await;
    let output = BranchOutput::interpret(kind, &raw, ctx.config);
    scratchpad.record_branch(&output).await;
    debug!(
        branch = kind.name(),
        hypotheses = output.hypotheses.len(),
        confidence = output.confidence,
        "Branch completed"
    );
    output
}

/// Runs every requested branch concurrently against a shared context block.
pub async fn execute_branches(
    ctx: &StageContext<'_>,
    prompt: &str,
    tri_pack: &TriStructurePack,
    kinds: &BTreeSet<BranchKind>,
    scratchpad: &Scratchpad,
) -> BranchSet {
    info!(
        branches = ?kinds.iter().map(BranchKind::name).collect::<Vec<_>>(),
        "Executing branches"
    );
    let context = tri_pack.context_block(prompt);
    let runs = kinds
        .iter()
        .map(|kind| run_branch(ctx, *kind, context.clone(), scratchpad));
    merge_outputs(join_all(runs).await)
}
