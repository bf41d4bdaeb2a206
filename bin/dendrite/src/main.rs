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

mod args;

use anyhow::{bail, Context, Result};
use args::Cli;
use clap::Parser;
use dendrite_core::{Orchestrator, PipelineConfig};
use dendrite_gateway::{settings_from_env, ProviderGateway};
use std::io::{IsTerminal, Read, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn read_prompt(arg: Option<String>) -> Result<String> {
    let prompt = match arg {
        Some(prompt) => prompt,
        None => {
            let mut stdin = std::io::stdin();
            if stdin.is_terminal() {
                bail!("no prompt given; pass it as an argument or pipe it on stdin");
            }
            let mut buffer = String::new();
            stdin
                .read_to_string(&mut buffer)
                .context("failed to read the prompt from stdin")?;
            buffer
        }
    };

    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        bail!("the prompt is empty");
    }
    Ok(prompt)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("debug,reqwest=info,hyper=info,h2=info,hyper_util=info,rustls=info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,reqwest=warn,hyper=warn,h2=warn,hyper_util=warn,rustls=warn")
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.debug)
        .init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env()?;

    let mut settings = settings_from_env();
    if let Some(seconds) = config.call_timeout_seconds {
        settings.call_timeout_seconds = seconds;
    }
    let gateway = ProviderGateway::from_settings(&settings)
        .context("failed to configure an inference provider")?;
    let orchestrator = Orchestrator::new(Arc::new(gateway), config)?;

    let prompt = read_prompt(cli.prompt.clone())?;
    info!(
        tier = %cli.tier,
        chief_model = %orchestrator.config().tiers.get(cli.tier).chief_model,
        chars = prompt.len(),
        "Running query"
    );

    let mut stdout = std::io::stdout();
    let run = orchestrator
        .execute(&prompt, cli.tier, cli.debug, &mut |chunk: &str| {
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        })
        .await;
    println!();

    if cli.report {
        eprintln!("{}", serde_json::to_string_pretty(&run)?);
    }
    Ok(())
}
