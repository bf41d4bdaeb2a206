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

use crate::branches::{self, BranchSet};
use crate::budget::{ReasoningBudget, Tier};
use crate::config::PipelineConfig;
use crate::decomposer::{self, TriStructurePack};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::{log_gateway_call, log_stage_event, log_stage_timing};
use crate::profiler;
use crate::prompts;
use crate::recurrence::{self, RecurrenceState, StopReason};
use crate::scratchpad::{Scratchpad, ScratchpadSnapshot};
use crate::synthesis::{self, SynthesisInput};
use crate::verification::{self, VerificationResult};
use futures::StreamExt;
use llm_contracts::{InferenceGateway, InferenceRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Profile,
    FastPath,
    Decompose,
    Branches,
    Verify,
    Recurrence,
    Synthesis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Profile => "profile",
            Stage::FastPath => "fast_path",
            Stage::Decompose => "decompose",
            Stage::Branches => "branches",
            Stage::Verify => "verify",
            Stage::Recurrence => "recurrence",
            Stage::Synthesis => "synthesis",
        }
    }
}

/// Diagnostic side-output, produced only for runs with `debug` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    Profiled {
        budget: ReasoningBudget,
    },
    FastPath {
        chief_model: String,
    },
    Decomposed {
        tri_pack: TriStructurePack,
    },
    BranchesCompleted {
        outputs: BranchSet,
    },
    Verified {
        pass: u32,
        result: VerificationResult,
    },
    Recurrence {
        recurrence_count: u32,
        state: RecurrenceState,
    },
    Synthesized {
        chars: usize,
    },
}

impl StageEvent {
    pub fn stage(&self) -> Stage {
        match self {
            StageEvent::Profiled { .. } => Stage::Profile,
            StageEvent::FastPath { .. } => Stage::FastPath,
            StageEvent::Decomposed { .. } => Stage::Decompose,
            StageEvent::BranchesCompleted { .. } => Stage::Branches,
            StageEvent::Verified { .. } => Stage::Verify,
            StageEvent::Recurrence { .. } => Stage::Recurrence,
            StageEvent::Synthesized { .. } => Stage::Synthesis,
        }
    }
}

/// Where debug events go: the caller's channel if one is attached, the log
/// otherwise.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventChannel {
    sink: Option<UnboundedSender<StageEvent>>,
}

impl EventChannel {
    fn emit(&self, event: StageEvent) {
        match &self.sink {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("Debug event receiver dropped");
                }
            }
            None => {
                let payload = serde_json::to_value(&event).unwrap_or_default();
                log_stage_event(event.stage().as_str(), &payload);
            }
        }
    }
}

/// What every stage needs: the gateway, the configuration and, for debug
/// runs, the event channel.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub gateway: &'a dyn InferenceGateway,
    pub config: &'a PipelineConfig,
    events: Option<&'a EventChannel>,
}

impl<'a> StageContext<'a> {
    pub fn new(gateway: &'a dyn InferenceGateway, config: &'a PipelineConfig) -> Self {
        Self {
            gateway,
            config,
            events: None,
        }
    }

    pub(crate) fn with_events(mut self, events: Option<&'a EventChannel>) -> Self {
        self.events = events;
        self
    }

    pub async fn call(
        &self,
        stage: Stage,
        model: &str,
        system: &str,
        user: String,
        max_tokens: u32,
    ) -> String {
        log_gateway_call(stage.as_str(), model, max_tokens);
        self.gateway
            .invoke(InferenceRequest::new(model, system, user, max_tokens))
            .await
    }

    /// Streams one call, forwarding each chunk, and returns the concatenation.
    pub async fn stream(
        &self,
        stage: Stage,
        model: &str,
        system: &str,
        user: String,
        max_tokens: u32,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> String {
        log_gateway_call(stage.as_str(), model, max_tokens);
        let mut chunks = self
            .gateway
            .invoke_streaming(InferenceRequest::new(model, system, user, max_tokens))
            .await;

        let mut text = String::new();
        while let Some(chunk) = chunks.next().await {
            on_chunk(&chunk);
            text.push_str(&chunk);
        }
        text
    }

    /// Builds the event only when someone will see it.
    pub fn emit(&self, event: impl FnOnce() -> StageEvent) {
        if let Some(events) = self.events {
            events.emit(event());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPath {
    FastPath,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Timings(Vec<StageTiming>);

impl Timings {
    fn record(&mut self, stage: Stage, started: Instant) {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log_stage_timing(stage.as_str(), elapsed_ms);
        self.0.push(StageTiming { stage, elapsed_ms });
    }
}

/// Report of one completed query.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub prompt: String,
    pub tier: Tier,
    pub path: RunPath,
    pub budget: ReasoningBudget,
    pub tri_pack: Option<TriStructurePack>,
    pub scratchpad: ScratchpadSnapshot,
    pub outputs: BranchSet,
    pub verification: Option<VerificationResult>,
    pub recurrence_count: u32,
    pub stop_reason: Option<StopReason>,
    pub timings: Vec<StageTiming>,
    pub final_response: String,
}

/// Runs queries through the staged pipeline.
///
/// Construction is the only fallible step: a configuration the gateway cannot
/// serve is rejected here, so a run itself always produces an answer.
pub struct Orchestrator {
    gateway: Arc<dyn InferenceGateway>,
    config: PipelineConfig,
    debug_sink: Option<UnboundedSender<StageEvent>>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn InferenceGateway>, config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        if let Some(model) = config
            .all_models()
            .into_iter()
            .find(|model| !gateway.supports(model))
        {
            return Err(PipelineError::Configuration(format!(
                "no inference provider is configured for model '{model}'"
            )));
        }

        info!(models = ?config.all_models(), "Orchestrator ready");
        Ok(Self {
            gateway,
            config,
            debug_sink: None,
        })
    }

    /// Sends debug events to `sink` instead of the log.
    pub fn with_debug_sink(mut self, sink: UnboundedSender<StageEvent>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, prompt: &str, tier: Tier, debug_mode: bool) -> String {
        self.run_streaming(prompt, tier, debug_mode, |_| {}).await
    }

    pub async fn run_streaming<F>(&self, prompt: &str, tier: Tier, debug_mode: bool, mut on_chunk: F) -> String
    where
        F: FnMut(&str) + Send,
    {
        self.execute(prompt, tier, debug_mode, &mut on_chunk)
            .await
            .final_response
    }

    pub async fn execute(
        &self,
        prompt: &str,
        tier: Tier,
        debug_mode: bool,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> PipelineRun {
        let id = Uuid::new_v4();
        let events = debug_mode.then(|| EventChannel {
            sink: self.debug_sink.clone(),
        });
        let ctx = StageContext::new(self.gateway.as_ref(), &self.config).with_events(events.as_ref());
        let mut timings = Timings::default();
        info!(run_id = %id, %tier, "Pipeline run started");

        let started = Instant::now();
        let budget = profiler::profile(&ctx, prompt, tier).await;
        timings.record(Stage::Profile, started);
        ctx.emit(|| StageEvent::Profiled {
            budget: budget.clone(),
        });

        if budget.takes_fast_path() {
            info!(run_id = %id, task_type = %budget.task_type, "Taking the fast path");
            ctx.emit(|| StageEvent::FastPath {
                chief_model: budget.chief_model.clone(),
            });

            let started = Instant::now();
            let final_response = ctx
                .stream(
                    Stage::FastPath,
                    &budget.chief_model,
                    prompts::FAST_PATH_ASSISTANT,
                    prompt.to_string(),
                    self.config.tiers.get(tier).fast_path_max_tokens,
                    on_chunk,
                )
                .await;
            timings.record(Stage::FastPath, started);

            return PipelineRun {
                id,
                prompt: prompt.to_string(),
                tier,
                path: RunPath::FastPath,
                budget,
                tri_pack: None,
                scratchpad: ScratchpadSnapshot::default(),
                outputs: BranchSet::new(),
                verification: None,
                recurrence_count: 0,
                stop_reason: None,
                timings: timings.0,
                final_response,
            };
        }

        let started = Instant::now();
        let tri_pack = decomposer::decompose(&ctx, prompt, &budget).await;
        timings.record(Stage::Decompose, started);
        ctx.emit(|| StageEvent::Decomposed {
            tri_pack: tri_pack.clone(),
        });

        let scratchpad = Scratchpad::new();
        let started = Instant::now();
        let outputs =
            branches::execute_branches(&ctx, prompt, &tri_pack, &budget.branches(), &scratchpad).await;
        timings.record(Stage::Branches, started);
        ctx.emit(|| StageEvent::BranchesCompleted {
            outputs: outputs.clone(),
        });

        let started = Instant::now();
        let verification =
            verification::verify(&ctx, prompt, &tri_pack, &outputs, &scratchpad).await;
        timings.record(Stage::Verify, started);
        ctx.emit(|| StageEvent::Verified {
            pass: 0,
            result: verification.clone(),
        });

        let started = Instant::now();
        let outcome = recurrence::run_recurrence(
            &ctx,
            prompt,
            &tri_pack,
            &budget,
            outputs,
            verification,
            &scratchpad,
        )
        .await;
        timings.record(Stage::Recurrence, started);
        if outcome.stop_reason == StopReason::DepthExhausted {
            warn!(
                run_id = %id,
                uncertainty = outcome.verification.uncertainty_score,
                "Recurrence depth exhausted before uncertainty settled"
            );
        }

        let recent_entries = scratchpad
            .recent(self.config.evidence.synthesis_entries)
            .await;
        let started = Instant::now();
        let final_response = synthesis::synthesize(
            &ctx,
            &SynthesisInput {
                prompt,
                tier,
                budget: &budget,
                tri_pack: &tri_pack,
                outputs: &outcome.outputs,
                verification: &outcome.verification,
                recurrence_count: outcome.recurrence_count,
                recent_entries: &recent_entries,
            },
            on_chunk,
        )
        .await;
        timings.record(Stage::Synthesis, started);
        ctx.emit(|| StageEvent::Synthesized {
            chars: final_response.chars().count(),
        });

        info!(
            run_id = %id,
            recurrence_count = outcome.recurrence_count,
            stop_reason = ?outcome.stop_reason,
            "Pipeline run finished"
        );

        PipelineRun {
            id,
            prompt: prompt.to_string(),
            tier,
            path: RunPath::Full,
            budget,
            tri_pack: Some(tri_pack),
            scratchpad: scratchpad.snapshot().await,
            outputs: outcome.outputs,
            verification: Some(outcome.verification),
            recurrence_count: outcome.recurrence_count,
            stop_reason: Some(outcome.stop_reason),
            timings: timings.0,
            final_response,
        }
    }
}
