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

//! Schemas for the JSON objects each stage asks a model to return.
//!
//! Models drift from the requested shape, so every field is optional and the
//! [`lenient`] coercions accept the usual variations (numbers sent as
//! strings, a single string where a list was asked for). Defaulting happens
//! here and nowhere else.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_UNCERTAINTY: f64 = 0.5;
pub const DEFAULT_REFINEMENT_INSTRUCTION: &str = "Re-analyze with more rigor";

/// Value-level coercions shared by every payload.
pub mod lenient {
    use serde_json::{Map, Value};
    use std::collections::BTreeMap;

    pub fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite())
    }

    fn as_text(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub fn text(value: Value) -> String {
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            other => as_text(other).unwrap_or_default(),
        }
    }

    pub fn string_list(value: Value) -> Vec<String> {
        match value {
            Value::Array(items) => items.into_iter().filter_map(as_text).collect(),
            Value::Null => Vec::new(),
            other => as_text(other).into_iter().collect(),
        }
    }

    pub fn score_map(value: Value) -> BTreeMap<String, f64> {
        match value {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(name, score)| number(&score).map(|s| (name, s)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// A reply object whose fields may arrive under several spellings.
    ///
    /// `take` resolves a field from the first spelling present, so a reply
    /// carrying both `uncertainty` and `uncertaintyScore` is still accepted.
    pub struct Fields(Map<String, Value>);

    impl Fields {
        pub fn new(value: Value) -> Self {
            match value {
                Value::Object(map) => Self(map),
                _ => Self(Map::new()),
            }
        }

        pub fn take(&mut self, keys: &[&str]) -> Option<Value> {
            keys.iter().find_map(|key| self.0.remove(*key))
        }
    }
}

use lenient::Fields;

/// Task Profiler reply. Only `taskType` is mandatory; without it the reply
/// is treated as unparsable.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Value")]
pub struct ProfilePayload {
    pub task_type: String,
    pub complexity: String,
    pub risk_score: Option<f64>,
    pub allowed_depth: Option<f64>,
    /// `None` when absent, which is different from an explicit empty list.
    pub required_branches: Option<Vec<String>>,
}

impl TryFrom<Value> for ProfilePayload {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut fields = Fields::new(value);
        let task_type = match fields.take(&["taskType", "task_type"]) {
            Some(Value::String(label)) => label,
            Some(_) => return Err("taskType must be a string".to_string()),
            None => return Err("missing taskType".to_string()),
        };

        Ok(Self {
            task_type,
            complexity: fields.take(&["complexity"]).map(lenient::text).unwrap_or_default(),
            risk_score: fields
                .take(&["riskScore", "risk_score"])
                .and_then(|v| lenient::number(&v)),
            allowed_depth: fields
                .take(&["allowedDepth", "allowed_depth"])
                .and_then(|v| lenient::number(&v)),
            required_branches: fields
                .take(&["requiredBranches", "required_branches", "branches"])
                .map(lenient::string_list),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct BranchPayload {
    pub hypotheses: Vec<String>,
    pub artifacts: Vec<String>,
    pub notes: String,
    pub contradictions: Vec<String>,
    pub confidence: Option<f64>,
}

impl From<Value> for BranchPayload {
    fn from(value: Value) -> Self {
        let mut fields = Fields::new(value);
        Self {
            hypotheses: fields
                .take(&["hypotheses", "hypothesis"])
                .map(lenient::string_list)
                .unwrap_or_default(),
            artifacts: fields
                .take(&["artifacts"])
                .map(lenient::string_list)
                .unwrap_or_default(),
            notes: fields.take(&["notes"]).map(lenient::text).unwrap_or_default(),
            contradictions: fields
                .take(&["contradictions"])
                .map(lenient::string_list)
                .unwrap_or_default(),
            confidence: fields.take(&["confidence"]).and_then(|v| lenient::number(&v)),
        }
    }
}

impl BranchPayload {
    pub fn confidence_or_default(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct CounterexamplePayload {
    pub counterexamples: Vec<String>,
}

impl From<Value> for CounterexamplePayload {
    fn from(value: Value) -> Self {
        Self {
            counterexamples: Fields::new(value)
                .take(&["counterexamples"])
                .map(lenient::string_list)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct ScoringPayload {
    pub branch_scores: BTreeMap<String, f64>,
    pub proven_invariants: Vec<String>,
    pub weak_points: Vec<String>,
    pub uncertainty: Option<f64>,
}

impl From<Value> for ScoringPayload {
    fn from(value: Value) -> Self {
        let mut fields = Fields::new(value);
        Self {
            branch_scores: fields
                .take(&["branchScores", "branch_scores", "scores"])
                .map(lenient::score_map)
                .unwrap_or_default(),
            proven_invariants: fields
                .take(&["provenInvariants", "proven_invariants"])
                .map(lenient::string_list)
                .unwrap_or_default(),
            weak_points: fields
                .take(&["weakPoints", "weak_points"])
                .map(lenient::string_list)
                .unwrap_or_default(),
            uncertainty: fields
                .take(&["uncertainty", "uncertaintyScore", "uncertainty_score"])
                .and_then(|v| lenient::number(&v)),
        }
    }
}

impl ScoringPayload {
    pub fn uncertainty_or_default(&self) -> f64 {
        self.uncertainty.unwrap_or(DEFAULT_UNCERTAINTY)
    }
}

/// Branch name to improvement instruction, taken either from the top level of
/// the object or from a nested `instructions` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct RefinementPlanPayload {
    pub instructions: BTreeMap<String, String>,
}

impl From<Value> for RefinementPlanPayload {
    fn from(value: Value) -> Self {
        let map = match value {
            Value::Object(mut map) => match map.remove("instructions") {
                Some(Value::Object(nested)) => nested,
                Some(other) => {
                    map.insert("instructions".to_string(), other);
                    map
                }
                None => map,
            },
            _ => return Self::default(),
        };

        let instructions = map
            .into_iter()
            .filter_map(|(name, instruction)| match instruction {
                Value::String(s) if !s.trim().is_empty() => Some((name.to_lowercase(), s)),
                _ => None,
            })
            .collect();
        Self { instructions }
    }
}

impl RefinementPlanPayload {
    pub fn instruction_for(&self, branch: &str) -> &str {
        self.instructions
            .get(branch)
            .map_or(DEFAULT_REFINEMENT_INSTRUCTION, String::as_str)
    }
}
