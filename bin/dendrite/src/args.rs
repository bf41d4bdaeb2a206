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

use clap::Parser;
use dendrite_core::Tier;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "dendrite")]
#[command(
    about = "Answer one query with the staged reasoning pipeline. Reads the prompt from stdin when none is given."
)]
pub struct Cli {
    /// The query. Read from stdin when omitted.
    pub prompt: Option<String>,

    /// low, high or max: picks the chief model and the refinement depth.
    #[arg(long, default_value = "high")]
    pub tier: Tier,

    /// Verbose logging plus per-stage diagnostics on stderr.
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// TOML pipeline configuration; built-in defaults otherwise.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the full run report as JSON to stderr after the answer.
    #[arg(long, default_value_t = false)]
    pub report: bool,
}
