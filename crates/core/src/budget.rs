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

use crate::branches::BranchKind;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Selects the chief model and the recurrence depth ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    High,
    Max,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::High, Tier::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::High => "high",
            Tier::Max => "max",
        }
    }

    /// Hard ceiling on recurrence passes, whatever the profiler proposes.
    pub fn depth_ceiling(&self) -> u32 {
        match self {
            Tier::Low => 1,
            Tier::High => 2,
            Tier::Max => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Tier::Low),
            "high" => Ok(Tier::High),
            "max" => Ok(Tier::Max),
            other => Err(PipelineError::Configuration(format!(
                "unknown tier '{other}', expected low, high or max"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    Math,
    Writing,
    Reasoning,
    WorldKnowledge,
    MultiStep,
    DataAnalysis,
    Conversation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Code => "code",
            TaskType::Math => "math",
            TaskType::Writing => "writing",
            TaskType::Reasoning => "reasoning",
            TaskType::WorldKnowledge => "world_knowledge",
            TaskType::MultiStep => "multi_step",
            TaskType::DataAnalysis => "data_analysis",
            TaskType::Conversation => "conversation",
        }
    }

    /// Accepts the label loosely: case, spaces and dashes are ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        match normalise_label(label).as_str() {
            "code" => Some(TaskType::Code),
            "math" => Some(TaskType::Math),
            "writing" => Some(TaskType::Writing),
            "reasoning" => Some(TaskType::Reasoning),
            "world_knowledge" => Some(TaskType::WorldKnowledge),
            "multi_step" => Some(TaskType::MultiStep),
            "data_analysis" => Some(TaskType::DataAnalysis),
            "conversation" => Some(TaskType::Conversation),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
            Complexity::Extreme => "extreme",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match normalise_label(label).as_str() {
            "low" => Some(Complexity::Low),
            "medium" => Some(Complexity::Medium),
            "high" => Some(Complexity::High),
            "extreme" => Some(Complexity::Extreme),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalise_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .replace(['-', ' '], "_")
}

/// Reasoning budget allocated by the profiler. Built once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningBudget {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub risk_score: f64,
    pub allowed_depth: u32,
    /// Branch names exactly as requested; unknown names are kept here and
    /// dropped by [`ReasoningBudget::branches`].
    pub requested_branches: Vec<String>,
    pub chief_model: String,
}

impl ReasoningBudget {
    pub const DEFAULT_BRANCHES: [BranchKind; 3] =
        [BranchKind::Logic, BranchKind::World, BranchKind::Code];

    /// Budget used when the profiler's reply cannot be interpreted.
    pub fn fallback(allowed_depth: u32, chief_model: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Reasoning,
            complexity: Complexity::Medium,
            risk_score: 0.5,
            allowed_depth,
            requested_branches: Self::DEFAULT_BRANCHES
                .iter()
                .map(|kind| kind.name().to_string())
                .collect(),
            chief_model: chief_model.into(),
        }
    }

    /// Requested branches that exist in the registry, deduplicated and in
    /// registry order.
    pub fn branches(&self) -> BTreeSet<BranchKind> {
        self.requested_branches
            .iter()
            .filter_map(|name| BranchKind::from_name(name))
            .collect()
    }

    pub fn takes_fast_path(&self) -> bool {
        self.task_type == TaskType::Conversation || self.branches().is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "type={} complexity={} risk={:.2} depth={} branches=[{}]",
            self.task_type,
            self.complexity,
            self.risk_score,
            self.allowed_depth,
            self.branches()
                .iter()
                .map(BranchKind::name)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
