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

use crate::branches::{BranchKind, BranchOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Hypothesis,
    Artifact,
    Note,
    Contradiction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub branch: BranchKind,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub kind: EntryKind,
}

impl ScratchpadEntry {
    pub fn new(branch: BranchKind, kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            branch,
            timestamp: Utc::now(),
            content: content.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadSnapshot {
    pub entries: Vec<ScratchpadEntry>,
    pub shared_artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct ScratchpadState {
    entries: Vec<ScratchpadEntry>,
    shared_artifacts: BTreeMap<String, String>,
}

/// Append-only log shared by every branch invocation of a run, plus a
/// last-write-wins artifact map.
///
/// Writers take the lock once per branch completion, so one branch's entries
/// are contiguous and in the order the branch produced them.
#[derive(Debug, Default)]
pub struct Scratchpad {
    state: RwLock<ScratchpadState>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, entry: ScratchpadEntry) {
        self.state.write().await.entries.push(entry);
    }

    /// Records a completed branch pass: its notes (when present), then each
    /// hypothesis, then its artifacts under `"<branch>/<index>"`.
    pub async fn record_branch(&self, output: &BranchOutput) {
        let branch = output.branch;
        let mut state = self.state.write().await;

        if !output.notes.trim().is_empty() {
            state
                .entries
                .push(ScratchpadEntry::new(branch, EntryKind::Note, output.notes.clone()));
        }
        for hypothesis in &output.hypotheses {
            state
                .entries
                .push(ScratchpadEntry::new(branch, EntryKind::Hypothesis, hypothesis.clone()));
        }
        for (index, artifact) in output.artifacts.iter().enumerate() {
            state
                .shared_artifacts
                .insert(format!("{}/{index}", branch.name()), artifact.clone());
        }

        trace!(
            branch = branch.name(),
            entries = state.entries.len(),
            "Scratchpad updated"
        );
    }

    /// The last `n` entries, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<ScratchpadEntry> {
        let state = self.state.read().await;
        let skip = state.entries.len().saturating_sub(n);
        state.entries[skip..].to_vec()
    }

    pub async fn artifact(&self, name: &str) -> Option<String> {
        self.state.read().await.shared_artifacts.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn snapshot(&self) -> ScratchpadSnapshot {
        let state = self.state.read().await;
        ScratchpadSnapshot {
            entries: state.entries.clone(),
            shared_artifacts: state.shared_artifacts.clone(),
        }
    }
}
