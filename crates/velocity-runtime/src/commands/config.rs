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

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::PathBuf;
use velocity_sdk::prelude::{QualityPreset, VelocityConfig};

#[derive(Args)]
pub struct ConfigArgs {
    /// Preset to start from: ultra-low, low, medium, high or ultra
    #[arg(long, default_value = "medium")]
    preset: String,

    /// Where to write the file; prints to stdout when omitted
    #[arg(long, short)]
    output: Option<PathBuf>,
}

pub fn execute(args: ConfigArgs) -> Result<()> {
    let quality = QualityPreset::from_name(&args.preset).ok_or_else(|| {
        anyhow!(
            "unknown preset '{}', expected one of: ultra-low, low, medium, high, ultra",
            args.preset
        )
    })?;
    let config = VelocityConfig::preset(quality);

    match args.output {
        Some(path) => {
            config
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {:?} preset to {}", quality, path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
