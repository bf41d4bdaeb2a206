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

use async_trait::async_trait;
use dendrite_core::{BranchKind, Orchestrator, PipelineConfig, StageEvent, StopReason, Tier};
use dendrite_gateway::{InferenceGateway, InferenceRequest, ScriptedGateway, TextStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const PROFILER: &str = "You are the Task Profiler";
const AUDITOR: &str = "You are the Consistency Auditor";

fn always_uncertain() -> ScriptedGateway {
    ScriptedGateway::new()
        .when_system(
            PROFILER,
            r#"{"taskType": "multi_step", "allowedDepth": 3, "requiredBranches": ["logic", "pattern", "adversarial"]}"#,
        )
        .when_system("You are the Logic branch", r#"{"hypotheses": ["l"], "confidence": "0.1"}"#)
        .when_system("You are the Pattern branch", "no json at all")
        .when_system("You are the Adversarial branch", r#"{"hypotheses": ["a"], "confidence": -3}"#)
        .when_system(AUDITOR, r#"{"uncertainty": 1.7, "weakPoints": ["logic, pattern and adversarial all shaky"]}"#)
}

#[tokio::test]
async fn test_recurrence_count_never_exceeds_tier_depth() {
    for tier in Tier::ALL {
        let gateway = Arc::new(always_uncertain());
        let orchestrator = Orchestrator::new(gateway.clone(), PipelineConfig::default()).unwrap();

        let run = orchestrator
            .execute("plan a migration", tier, false, &mut |_: &str| {})
            .await;

        assert_eq!(run.budget.allowed_depth, tier.depth_ceiling());
        assert_eq!(run.recurrence_count, tier.depth_ceiling(), "tier {tier}");
        assert_eq!(run.stop_reason, Some(StopReason::DepthExhausted));
        assert_eq!(
            gateway.count_system(AUDITOR),
            usize::try_from(tier.depth_ceiling()).unwrap() + 1
        );

        let verification = run.verification.unwrap();
        assert!((0.0..=1.0).contains(&verification.uncertainty_score));
        for output in run.outputs.values() {
            assert!((0.0..=1.0).contains(&output.confidence), "{output:?}");
        }
    }
}

#[tokio::test]
async fn test_partial_max_tier_config_keeps_max_ceilings() {
    let config = PipelineConfig::from_toml_str("[tiers.max]\nchief_model = \"claude-opus-4-1\"\n").unwrap();
    let gateway = Arc::new(always_uncertain());
    let orchestrator = Orchestrator::new(gateway.clone(), config).unwrap();

    let run = orchestrator
        .execute("plan a migration", Tier::Max, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.budget.allowed_depth, 3);
    assert_eq!(run.recurrence_count, 3);
    assert_eq!(run.stop_reason, Some(StopReason::DepthExhausted));

    let synthesis = gateway
        .calls()
        .into_iter()
        .find(|call| call.system.contains("You are the Grand Synthesizer"))
        .unwrap();
    assert_eq!(synthesis.model, "claude-opus-4-1");
    assert_eq!(synthesis.max_tokens, 8192);
}

#[tokio::test]
async fn test_verification_passes_are_monotonic() {
    let gateway = Arc::new(always_uncertain());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(gateway, PipelineConfig::default())
        .unwrap()
        .with_debug_sink(tx);

    orchestrator.run("plan a migration", Tier::Max, true).await;

    let mut passes = Vec::new();
    let mut counts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            StageEvent::Verified { pass, .. } => passes.push(pass),
            StageEvent::Recurrence {
                recurrence_count, ..
            } => counts.push(recurrence_count),
            _ => {}
        }
    }
    assert_eq!(passes, vec![0, 1, 2, 3]);
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(counts.last(), Some(&3));
}

#[tokio::test]
async fn test_failed_refinements_still_raise_confidence() {
    let gateway = Arc::new(always_uncertain());
    let orchestrator = Orchestrator::new(gateway, PipelineConfig::default()).unwrap();

    let run = orchestrator
        .execute("plan a migration", Tier::High, false, &mut |_: &str| {})
        .await;

    // Pattern never parses: 0.5 -> 0.6 -> 0.7, keeping its first hypothesis.
    let pattern = &run.outputs[&BranchKind::Pattern];
    assert!((pattern.confidence - 0.7).abs() < 1e-9);
    assert_eq!(pattern.hypotheses, vec!["no json at all"]);
    // Adversarial parses each time at 0.0 and is boosted once per pass.
    assert!((run.outputs[&BranchKind::Adversarial].confidence - 0.1).abs() < 1e-9);
}

/// Answers each branch after a different delay so completion order differs
/// from request order.
struct StaggeredGateway {
    inner: ScriptedGateway,
}

impl StaggeredGateway {
    fn delay_for(system: &str) -> Duration {
        let ms = if system.contains("Logic branch") {
            300
        } else if system.contains("World branch") {
            10
        } else if system.contains("Code branch") {
            150
        } else {
            1
        };
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl InferenceGateway for StaggeredGateway {
    async fn invoke(&self, request: InferenceRequest) -> String {
        tokio::time::sleep(Self::delay_for(&request.system)).await;
        self.inner.invoke(request).await
    }

    async fn invoke_streaming(&self, request: InferenceRequest) -> TextStream {
        self.inner.invoke_streaming(request).await
    }
}

fn branch_script() -> ScriptedGateway {
    ScriptedGateway::new()
        .when_system(PROFILER, r#"{"taskType": "reasoning", "requiredBranches": ["code", "world", "logic"]}"#)
        .when_system("You are the Logic branch", r#"{"hypotheses": ["L"], "notes": "ln", "confidence": 0.9}"#)
        .when_system("You are the World branch", r#"{"hypotheses": ["W"], "confidence": 0.8}"#)
        .when_system("You are the Code branch", r#"{"hypotheses": ["C"], "artifacts": ["c0"], "confidence": 0.7}"#)
        .when_system(AUDITOR, r#"{"uncertainty": 0.0}"#)
        .when_system("You are the Grand Synthesizer", "done")
}

#[tokio::test(start_paused = true)]
async fn test_merge_ignores_completion_order() {
    let staggered = Orchestrator::new(
        Arc::new(StaggeredGateway {
            inner: branch_script(),
        }),
        PipelineConfig::default(),
    )
    .unwrap();
    let immediate = Orchestrator::new(Arc::new(branch_script()), PipelineConfig::default()).unwrap();

    let slow = staggered
        .execute("q", Tier::High, false, &mut |_: &str| {})
        .await;
    let fast = immediate
        .execute("q", Tier::High, false, &mut |_: &str| {})
        .await;

    assert_eq!(slow.outputs, fast.outputs);
    assert_eq!(
        slow.outputs.keys().copied().collect::<Vec<_>>(),
        vec![BranchKind::Logic, BranchKind::World, BranchKind::Code]
    );

    // The log follows completion order: world, code, then logic.
    let order: Vec<BranchKind> = slow.scratchpad.entries.iter().map(|e| e.branch).collect();
    assert_eq!(
        order,
        vec![BranchKind::World, BranchKind::Code, BranchKind::Logic, BranchKind::Logic]
    );
    assert_eq!(slow.scratchpad.shared_artifacts, fast.scratchpad.shared_artifacts);
}

#[tokio::test]
async fn test_streaming_gateway_chunks_concatenate() {
    let gateway = ScriptedGateway::new()
        .when_system("x", "abcdefghij")
        .with_chunk_chars(3);
    let chunks: Vec<String> = gateway
        .invoke_streaming(InferenceRequest::new("m", "x", "u", 10))
        .await
        .collect()
        .await;
    assert_eq!(chunks, vec!["abc", "def", "ghi", "j"]);
}
