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

use dendrite_core::{
    BranchKind, EntryKind, Orchestrator, PipelineConfig, PipelineError, RunPath, StageEvent,
    StopReason, TaskType, Tier,
};
use dendrite_gateway::ScriptedGateway;
use std::sync::Arc;
use tokio::sync::mpsc;

const PROFILER: &str = "You are the Task Profiler";
const SYMBOLIC: &str = "You are the Symbolic Abstractor";
const LOGIC: &str = "You are the Logic branch";
const WORLD: &str = "You are the World branch";
const CODE: &str = "You are the Code branch";
const COUNTEREXAMPLES: &str = "You are the Counterexample Generator";
const AUDITOR: &str = "You are the Consistency Auditor";
const PLANNER: &str = "You are the Refinement Planner";
const SYNTHESIZER: &str = "You are the Grand Synthesizer";
const FAST_PATH: &str = "You are a helpful assistant";

fn orchestrator(gateway: &Arc<ScriptedGateway>) -> Orchestrator {
    Orchestrator::new(gateway.clone(), PipelineConfig::default()).unwrap()
}

#[tokio::test]
async fn test_conversation_takes_fast_path() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, r#"{"taskType": "conversation", "requiredBranches": []}"#)
            .when_system(FAST_PATH, "Hello there! How can I help?")
            .with_chunk_chars(5),
    );
    let orchestrator = orchestrator(&gateway);

    let mut chunks = Vec::new();
    let run = orchestrator
        .execute("hi!", Tier::High, false, &mut |chunk: &str| chunks.push(chunk.to_string()))
        .await;

    assert_eq!(run.path, RunPath::FastPath);
    assert_eq!(run.final_response, "Hello there! How can I help?");
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), run.final_response);
    assert_eq!(run.budget.task_type, TaskType::Conversation);
    assert!(run.tri_pack.is_none() && run.verification.is_none());
    assert_eq!(run.recurrence_count, 0);

    let calls = gateway.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].model, PipelineConfig::default().tiers.high.chief_model);
    assert_eq!(calls[1].user, "hi!");
    for stage in [SYMBOLIC, LOGIC, AUDITOR, PLANNER, SYNTHESIZER] {
        assert_eq!(gateway.count_system(stage), 0, "{stage} should not run");
    }
}

#[tokio::test]
async fn test_confident_first_pass_skips_recurrence() {
    // Blended uncertainty: (0.5 + (1 - 0.9)) / 2 = 0.3.
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(
                PROFILER,
                r#"{"taskType": "reasoning", "complexity": "medium", "allowedDepth": 2, "requiredBranches": ["logic"]}"#,
            )
            .when_system(LOGIC, r#"{"hypotheses": ["A implies B"], "notes": "modus ponens", "confidence": 0.9}"#)
            .when_system(COUNTEREXAMPLES, r#"{"counterexamples": []}"#)
            .when_system(
                AUDITOR,
                r#"{"branchScores": {"logic": 0.9}, "provenInvariants": ["B holds"], "weakPoints": [], "uncertainty": 0.5}"#,
            )
            .when_system(SYNTHESIZER, "B follows from A."),
    );

    let run = orchestrator(&gateway)
        .execute("Does B follow?", Tier::High, false, &mut |_: &str| {})
        .await;

    let verification = run.verification.as_ref().unwrap();
    assert!((verification.uncertainty_score - 0.3).abs() < 1e-9);
    assert_eq!(run.stop_reason, Some(StopReason::Confident));
    assert_eq!(run.recurrence_count, 0);
    assert_eq!(run.final_response, "B follows from A.");
    assert_eq!(gateway.count_system(PLANNER), 0);
    assert_eq!(gateway.count_system(AUDITOR), 1);
    assert_eq!(gateway.count_system(SYMBOLIC), 1);

    let synthesis = gateway
        .calls()
        .into_iter()
        .find(|call| call.system.contains(SYNTHESIZER))
        .unwrap();
    assert!(synthesis.user.contains("A implies B"));
    assert!(synthesis.user.contains("- B holds"));
    assert!(synthesis.user.ends_with("Does B follow?"));
    assert_eq!(synthesis.max_tokens, PipelineConfig::default().tiers.high.synthesis_max_tokens);
}

#[tokio::test]
async fn test_weak_branch_is_refined_and_reverified() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(
                PROFILER,
                r#"{"taskType": "code", "allowedDepth": 2, "requiredBranches": ["logic", "code"]}"#,
            )
            .when(CODE, "REFINEMENT PASS", r#"{"hypotheses": ["loop bound fixed"], "confidence": 0.7}"#)
            .when_system(CODE, r#"{"hypotheses": ["off by one"], "artifacts": ["for i in 0..n"], "confidence": 0.4}"#)
            .when_system(LOGIC, r#"{"hypotheses": ["terminates"], "confidence": 0.9}"#)
            .when_system(COUNTEREXAMPLES, r#"{"counterexamples": ["n = 0 panics"]}"#)
            .when_system_sequence(
                AUDITOR,
                vec![
                    r#"{"branchScores": {"logic": 0.9, "code": 0.4}, "weakPoints": [], "uncertainty": 0.9}"#,
                    r#"{"branchScores": {"logic": 0.9, "code": 0.85}, "weakPoints": [], "uncertainty": 0.2}"#,
                ],
            )
            .when_system(PLANNER, r#"{"instructions": {"code": "Handle n = 0 explicitly"}}"#)
            .when_system(SYNTHESIZER, "Use 0..n and guard n = 0."),
    );

    let run = orchestrator(&gateway)
        .execute("Fix my loop", Tier::High, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.recurrence_count, 1);
    assert_eq!(run.stop_reason, Some(StopReason::Confident));
    assert_eq!(gateway.count_system(CODE), 2);
    assert_eq!(gateway.count_system(LOGIC), 1);
    assert_eq!(gateway.count_system(AUDITOR), 2);
    assert_eq!(gateway.count_system(PLANNER), 1);

    let code = &run.outputs[&BranchKind::Code];
    assert_eq!(code.hypotheses, vec!["loop bound fixed"]);
    assert!((code.confidence - 0.8).abs() < 1e-9);
    assert_eq!(run.outputs[&BranchKind::Logic].hypotheses, vec!["terminates"]);

    let refinement = gateway
        .calls()
        .into_iter()
        .find(|call| call.system.contains(CODE) && call.user.contains("REFINEMENT PASS"))
        .unwrap();
    assert!(refinement.user.contains("Handle n = 0 explicitly"));
    assert!(refinement.user.contains("- n = 0 panics"));
    assert!(refinement.user.contains("- off by one"));

    // The refined reply had no artifacts, so the first pass's artifact survives.
    assert_eq!(
        run.scratchpad.shared_artifacts.get("code/0").map(String::as_str),
        Some("for i in 0..n")
    );
    assert!(run
        .scratchpad
        .entries
        .iter()
        .any(|e| e.branch == BranchKind::Code && e.content == "loop bound fixed"));
}

#[tokio::test]
async fn test_depth_exhaustion_forces_stop() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, r#"{"taskType": "code", "allowedDepth": 3, "requiredBranches": ["code"]}"#)
            .when_system(CODE, r#"{"hypotheses": ["maybe"], "confidence": 0.2}"#)
            .when_system(AUDITOR, r#"{"weakPoints": ["the code is wrong"], "uncertainty": 0.95}"#)
            .when_system(SYNTHESIZER, "Best effort."),
    );

    let run = orchestrator(&gateway)
        .execute("hard problem", Tier::Low, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.budget.allowed_depth, 1);
    assert_eq!(run.recurrence_count, 1);
    assert_eq!(run.stop_reason, Some(StopReason::DepthExhausted));
    assert_eq!(run.final_response, "Best effort.");
    assert_eq!(gateway.count_system(CODE), 2);
    assert_eq!(gateway.count_system(AUDITOR), 2);
}

#[tokio::test]
async fn test_unparsable_branch_reply_degrades() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, r#"{"taskType": "reasoning", "requiredBranches": ["world"]}"#)
            .when_system(WORLD, "I think X happens because Y")
            .when_system(AUDITOR, r#"{"branchScores": {"world": 0.8}, "uncertainty": 0.1}"#)
            .when_system(SYNTHESIZER, "X, because Y."),
    );

    let run = orchestrator(&gateway)
        .execute("Why X?", Tier::High, false, &mut |_: &str| {})
        .await;

    let world = &run.outputs[&BranchKind::World];
    assert_eq!(world.hypotheses, vec!["I think X happens because Y"]);
    assert_eq!(world.confidence, 0.5);
    assert!(world.artifacts.is_empty() && world.contradictions.is_empty());

    let entries = &run.scratchpad.entries;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Hypothesis);
    assert_eq!(entries[0].branch, BranchKind::World);
}

#[tokio::test]
async fn test_malformed_profile_uses_default_budget() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, "Sorry, I can't classify that.")
            .when_system(AUDITOR, r#"{"uncertainty": 0.0}"#)
            .when_system(SYNTHESIZER, "Done."),
    );

    let run = orchestrator(&gateway)
        .execute("Something ambiguous", Tier::Max, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.path, RunPath::Full);
    assert_eq!(run.budget.task_type, TaskType::Reasoning);
    assert_eq!(run.budget.allowed_depth, 3);
    assert_eq!(
        run.outputs.keys().copied().collect::<Vec<_>>(),
        vec![BranchKind::Logic, BranchKind::World, BranchKind::Code]
    );
    assert_eq!(gateway.count_system(LOGIC), 1);
    assert_eq!(gateway.count_system(WORLD), 1);
    assert_eq!(gateway.count_system(CODE), 1);
    assert_eq!(gateway.count_system("You are the Pattern branch"), 0);
}

#[tokio::test]
async fn test_unknown_branches_are_never_executed() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(
                PROFILER,
                r#"{"taskType": "math", "requiredBranches": ["numerology", "code"]}"#,
            )
            .when_system(AUDITOR, r#"{"uncertainty": 0.0}"#),
    );

    let run = orchestrator(&gateway)
        .execute("2 + 2", Tier::Low, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.outputs.keys().copied().collect::<Vec<_>>(), vec![BranchKind::Code]);
    assert_eq!(run.budget.requested_branches, vec!["numerology", "code"]);
}

#[tokio::test]
async fn test_provider_failures_degrade_instead_of_failing() {
    let marker = "[Error calling claude-haiku-4-5: connection refused]";
    let gateway = Arc::new(ScriptedGateway::new().with_fallback(marker));

    let run = orchestrator(&gateway)
        .execute("anything", Tier::High, false, &mut |_: &str| {})
        .await;

    assert_eq!(run.path, RunPath::Full);
    assert_eq!(run.outputs.len(), 3);
    for output in run.outputs.values() {
        assert_eq!(output.hypotheses, vec![marker]);
        assert_eq!(output.confidence, 0.5);
    }
    let verification = run.verification.unwrap();
    assert!((0.0..=1.0).contains(&verification.uncertainty_score));
    assert_eq!(run.final_response, marker);
}

#[tokio::test]
async fn test_unsupported_model_is_a_configuration_error() {
    let chief = PipelineConfig::default().tiers.max.chief_model;
    let gateway = Arc::new(ScriptedGateway::new().with_unsupported_model(chief.clone()));

    let err = Orchestrator::new(gateway.clone(), PipelineConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Configuration(ref msg) if msg.contains(&chief)));
    assert!(gateway.calls().is_empty());

    let mut config = PipelineConfig::default();
    config.models.logic = "  ".into();
    assert!(Orchestrator::new(Arc::new(ScriptedGateway::new()), config).is_err());
}

#[tokio::test]
async fn test_debug_events_go_to_the_sink() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, r#"{"taskType": "reasoning", "requiredBranches": ["logic"]}"#)
            .when_system(LOGIC, r#"{"hypotheses": ["h"], "confidence": 0.9}"#)
            .when_system(AUDITOR, r#"{"uncertainty": 0.1}"#)
            .when_system(SYNTHESIZER, "answer"),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator(&gateway).with_debug_sink(tx);

    let answer = orchestrator.run("q", Tier::High, false).await;
    assert_eq!(answer, "answer");
    assert!(rx.try_recv().is_err());

    let answer = orchestrator.run("q", Tier::High, true).await;
    assert_eq!(answer, "answer");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(StageEvent::Profiled { .. })));
    assert!(matches!(events.last(), Some(StageEvent::Synthesized { chars: 6 })));
    assert!(events.iter().any(|e| matches!(e, StageEvent::Decomposed { .. })));
    assert!(events.iter().any(|e| matches!(e, StageEvent::BranchesCompleted { outputs } if outputs.len() == 1)));
    assert!(events.iter().any(|e| matches!(e, StageEvent::Verified { pass: 0, .. })));
    assert!(events.iter().any(|e| matches!(e, StageEvent::Recurrence { .. })));
}

#[tokio::test]
async fn test_run_streaming_forwards_synthesis_chunks() {
    let answer = "The answer is forty-two, derived carefully.";
    let gateway = Arc::new(
        ScriptedGateway::new()
            .when_system(PROFILER, r#"{"taskType": "math", "requiredBranches": ["logic"]}"#)
            .when_system(LOGIC, r#"{"hypotheses": ["42"], "confidence": 0.95}"#)
            .when_system(AUDITOR, r#"{"uncertainty": 0.05}"#)
            .when_system(SYNTHESIZER, answer)
            .with_chunk_chars(8),
    );

    let mut streamed = String::new();
    let mut chunk_count = 0;
    let result = orchestrator(&gateway)
        .run_streaming("what is 6 * 7?", Tier::Max, false, |chunk| {
            chunk_count += 1;
            streamed.push_str(chunk);
        })
        .await;

    assert_eq!(result, answer);
    assert_eq!(streamed, answer);
    assert!(chunk_count > 1);
}
