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

use crate::budget::ReasoningBudget;
use crate::pipeline::{Stage, StageContext};
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Three independent views of the problem, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriStructurePack {
    pub symbolic: String,
    pub invariants: String,
    pub formal: String,
}

impl TriStructurePack {
    /// Context shared by every branch call: the three views, then the request.
    pub fn context_block(&self, prompt: &str) -> String {
        format!(
            "## Symbolic view\n{}\n\n## Invariants\n{}\n\n## Formal specification\n{}\n\n## Original request\n{prompt}",
            self.symbolic.trim(),
            self.invariants.trim(),
            self.formal.trim(),
        )
    }
}

pub async fn decompose(
    ctx: &StageContext<'_>,
    prompt: &str,
    budget: &ReasoningBudget,
) -> TriStructurePack {
    let model = ctx.config.models.utility.as_str();
    let max_tokens = ctx.config.budgets.decomposer;
    let user = format!(
        "Task type: {}\nComplexity: {}\n\n{prompt}",
        budget.task_type, budget.complexity
    );

    let (symbolic, invariants, formal) = futures::join!(
        ctx.call(Stage::Decompose, model, prompts::SYMBOLIC_ABSTRACTOR, user.clone(), max_tokens),
        ctx.call(Stage::Decompose, model, prompts::INVARIANT_EXTRACTOR, user.clone(), max_tokens),
        ctx.call(Stage::Decompose, model, prompts::FORMAL_SPECIFIER, user, max_tokens),
    );

    debug!(
        symbolic_chars = symbolic.len(),
        invariants_chars = invariants.len(),
        formal_chars = formal.len(),
        "Decomposition complete"
    );
    TriStructurePack {
        symbolic,
        invariants,
        formal,
    }
}
