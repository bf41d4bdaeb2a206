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

//! Staged reasoning pipeline over an inference gateway.
//!
//! A run classifies the task ([`profiler`]), decomposes it into three views
//! ([`decomposer`]), fans out to reasoning branches that share a
//! [`scratchpad`] ([`branches`]), verifies their hypotheses
//! ([`verification`]), re-runs weak branches while uncertainty stays high
//! ([`recurrence`]) and finally streams a synthesized answer
//! ([`synthesis`]). [`Orchestrator`] sequences the stages.

pub mod branches;
pub mod budget;
pub mod config;
pub mod decomposer;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod payloads;
pub mod pipeline;
pub mod profiler;
pub mod prompts;
pub mod recurrence;
pub mod scratchpad;
pub mod synthesis;
pub mod utils;
pub mod verification;

pub use branches::{BranchKind, BranchOutput, BranchSet};
pub use budget::{Complexity, ReasoningBudget, TaskType, Tier};
pub use config::PipelineConfig;
pub use decomposer::TriStructurePack;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Orchestrator, PipelineRun, RunPath, Stage, StageContext, StageEvent, StageTiming};
pub use recurrence::{RecurrenceOutcome, RecurrenceState, StopReason};
pub use scratchpad::{EntryKind, Scratchpad, ScratchpadEntry, ScratchpadSnapshot};
pub use verification::VerificationResult;
