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

use crate::budget::Tier;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const ENV_CHIEF_MODEL_LOW: &str = "DENDRITE_CHIEF_MODEL_LOW";
pub const ENV_CHIEF_MODEL_HIGH: &str = "DENDRITE_CHIEF_MODEL_HIGH";
pub const ENV_CHIEF_MODEL_MAX: &str = "DENDRITE_CHIEF_MODEL_MAX";
pub const ENV_UTILITY_MODEL: &str = "DENDRITE_UTILITY_MODEL";
pub const ENV_CALL_TIMEOUT_SECS: &str = "DENDRITE_CALL_TIMEOUT_SECS";

const HAIKU: &str = "claude-haiku-4-5";
const SONNET: &str = "claude-sonnet-4-5";
const OPUS: &str = "claude-opus-4-1";

/// Everything tunable about a pipeline run. Every field has a default, so a
/// TOML file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub tiers: TierTable,
    pub models: ModelTable,
    pub budgets: TokenBudgets,
    pub thresholds: Thresholds,
    pub evidence: EvidenceLimits,
    /// Passed on to the gateway; `None` keeps the gateway's own setting.
    pub call_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSettings {
    pub chief_model: String,
    pub max_depth: u32,
    pub synthesis_max_tokens: u32,
    pub fast_path_max_tokens: u32,
}

impl TierSettings {
    fn new(chief_model: &str, max_depth: u32, synthesis_max_tokens: u32, fast_path_max_tokens: u32) -> Self {
        Self {
            chief_model: chief_model.to_string(),
            max_depth,
            synthesis_max_tokens,
            fast_path_max_tokens,
        }
    }

    pub fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Low => Self::new(HAIKU, tier.depth_ceiling(), 2048, 1024),
            Tier::High => Self::new(SONNET, tier.depth_ceiling(), 4096, 2048),
            Tier::Max => Self::new(OPUS, tier.depth_ceiling(), 8192, 4096),
        }
    }
}

/// One `[tiers.<name>]` table as written; unset keys come from that tier's
/// own defaults, never from another tier's.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TierOverrides {
    chief_model: Option<String>,
    max_depth: Option<u32>,
    synthesis_max_tokens: Option<u32>,
    fast_path_max_tokens: Option<u32>,
}

impl TierOverrides {
    fn resolve(self, tier: Tier) -> TierSettings {
        let defaults = TierSettings::defaults_for(tier);
        TierSettings {
            chief_model: self.chief_model.unwrap_or(defaults.chief_model),
            max_depth: self.max_depth.unwrap_or(defaults.max_depth),
            synthesis_max_tokens: self.synthesis_max_tokens.unwrap_or(defaults.synthesis_max_tokens),
            fast_path_max_tokens: self.fast_path_max_tokens.unwrap_or(defaults.fast_path_max_tokens),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TierTableOverrides {
    low: TierOverrides,
    high: TierOverrides,
    max: TierOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TierTableOverrides")]
pub struct TierTable {
    pub low: TierSettings,
    pub high: TierSettings,
    pub max: TierSettings,
}

impl From<TierTableOverrides> for TierTable {
    fn from(overrides: TierTableOverrides) -> Self {
        Self {
            low: overrides.low.resolve(Tier::Low),
            high: overrides.high.resolve(Tier::High),
            max: overrides.max.resolve(Tier::Max),
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        TierTableOverrides::default().into()
    }
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> &TierSettings {
        match tier {
            Tier::Low => &self.low,
            Tier::High => &self.high,
            Tier::Max => &self.max,
        }
    }

    fn get_mut(&mut self, tier: Tier) -> &mut TierSettings {
        match tier {
            Tier::Low => &mut self.low,
            Tier::High => &mut self.high,
            Tier::Max => &mut self.max,
        }
    }
}

/// Model used by the utility stages and by each branch capability profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTable {
    pub utility: String,
    pub logic: String,
    pub pattern: String,
    pub world: String,
    pub code: String,
    pub adversarial: String,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self {
            utility: HAIKU.to_string(),
            logic: SONNET.to_string(),
            pattern: HAIKU.to_string(),
            world: SONNET.to_string(),
            code: SONNET.to_string(),
            adversarial: HAIKU.to_string(),
        }
    }
}

/// Output ceilings, in tokens, for every non-chief call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgets {
    pub profiler: u32,
    pub decomposer: u32,
    pub branch: u32,
    pub counterexample: u32,
    pub scoring: u32,
    pub refinement_plan: u32,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            profiler: 400,
            decomposer: 600,
            branch: 1500,
            counterexample: 800,
            scoring: 1000,
            refinement_plan: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Recurrence stops once uncertainty is below this and no weak points remain.
    pub uncertainty_stop: f64,
    pub weak_score: f64,
    pub confidence_boost: f64,
    pub confidence_cap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            uncertainty_stop: 0.55,
            weak_score: 0.5,
            confidence_boost: 0.1,
            confidence_cap: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceLimits {
    pub degraded_hypothesis_chars: usize,
    pub verification_entries: usize,
    pub verification_entry_chars: usize,
    pub synthesis_entries: usize,
    pub tri_pack_excerpt_chars: usize,
    pub max_counterexamples: usize,
    pub ledger_hypotheses: usize,
    pub ledger_artifacts: usize,
}

impl Default for EvidenceLimits {
    fn default() -> Self {
        Self {
            degraded_hypothesis_chars: 500,
            verification_entries: 10,
            verification_entry_chars: 200,
            synthesis_entries: 5,
            tri_pack_excerpt_chars: 400,
            max_counterexamples: 2,
            ledger_hypotheses: 3,
            ledger_artifacts: 2,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(source: &str) -> PipelineResult<Self> {
        toml::from_str(source).map_err(|e| PipelineError::ConfigLoad {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| PipelineError::ConfigLoad {
            path: shown.clone(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&source).map_err(|e| PipelineError::ConfigLoad {
            path: shown.clone(),
            reason: e.to_string(),
        })?;
        info!(path = %shown, "Loaded pipeline configuration");
        Ok(config)
    }

    /// Overlays the `DENDRITE_*` environment variables.
    pub fn apply_env(&mut self) -> PipelineResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> PipelineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        for (tier, key) in [
            (Tier::Low, ENV_CHIEF_MODEL_LOW),
            (Tier::High, ENV_CHIEF_MODEL_HIGH),
            (Tier::Max, ENV_CHIEF_MODEL_MAX),
        ] {
            if let Some(model) = lookup(key) {
                debug!(%tier, model = %model, "Chief model overridden from environment");
                self.tiers.get_mut(tier).chief_model = model.trim().to_string();
            }
        }

        if let Some(model) = lookup(ENV_UTILITY_MODEL) {
            self.models.utility = model.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_SECS) {
            let seconds = raw.trim().parse::<u64>().map_err(|_| {
                PipelineError::Configuration(format!(
                    "{ENV_CALL_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            self.call_timeout_seconds = Some(seconds);
        }

        Ok(())
    }

    /// Effective recurrence ceiling for a tier: the configured depth, never
    /// above the tier's hard ceiling and never below one.
    pub fn depth_ceiling(&self, tier: Tier) -> u32 {
        self.tiers
            .get(tier)
            .max_depth
            .clamp(1, tier.depth_ceiling())
    }

    fn model_ids(&self) -> impl Iterator<Item = &str> {
        Tier::ALL
            .into_iter()
            .map(|tier| self.tiers.get(tier).chief_model.as_str())
            .chain([
                self.models.utility.as_str(),
                self.models.logic.as_str(),
                self.models.pattern.as_str(),
                self.models.world.as_str(),
                self.models.code.as_str(),
                self.models.adversarial.as_str(),
            ])
    }

    /// Every model id a run may call, deduplicated.
    pub fn all_models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self.model_ids().collect();
        models.sort_unstable();
        models.dedup();
        models
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.model_ids().any(|model| model.trim().is_empty()) {
            return Err(PipelineError::Configuration(
                "model identifiers must not be empty".to_string(),
            ));
        }

        for tier in Tier::ALL {
            let settings = self.tiers.get(tier);
            if settings.synthesis_max_tokens == 0 || settings.fast_path_max_tokens == 0 {
                return Err(PipelineError::Configuration(format!(
                    "token ceilings for tier '{tier}' must be greater than zero"
                )));
            }
        }

        let budgets = &self.budgets;
        if [
            budgets.profiler,
            budgets.decomposer,
            budgets.branch,
            budgets.counterexample,
            budgets.scoring,
            budgets.refinement_plan,
        ]
        .contains(&0)
        {
            return Err(PipelineError::Configuration(
                "stage token budgets must be greater than zero".to_string(),
            ));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("uncertainty_stop", t.uncertainty_stop),
            ("weak_score", t.weak_score),
            ("confidence_boost", t.confidence_boost),
            ("confidence_cap", t.confidence_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Configuration(format!(
                    "threshold '{name}' must lie in [0, 1], got {value}"
                )));
            }
        }

        if self.call_timeout_seconds == Some(0) {
            return Err(PipelineError::Configuration(
                "call timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}
