// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Velocity command-line tool.
//!
//! - `velocity simulate` runs the frame loop against the headless backend
//! - `velocity cache-info <file>` dumps a persisted shader cache
//! - `velocity config --preset <name>` writes a preset configuration

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Velocity GPU optimization layer tools
#[derive(Parser)]
#[command(name = "velocity")]
#[command(about = "Tools for the Velocity GPU optimization layer")]
#[command(version)]
struct Cli {
    /// Default log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic frame loop on the headless backend
    Simulate(commands::simulate::SimulateArgs),

    /// Print the header and entries of a shader cache file
    CacheInfo(commands::cache_info::CacheInfoArgs),

    /// Write a quality preset as a JSON configuration file
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    velocity_telemetry::init_logging(&cli.log);

    match cli.command {
        Commands::Simulate(args) => commands::simulate::execute(args),
        Commands::CacheInfo(args) => commands::cache_info::execute(args),
        Commands::Config(args) => commands::config::execute(args),
    }
}
