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

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use velocity_io::shader_cache::format;

#[derive(Args)]
pub struct CacheInfoArgs {
    /// Path to a shader_cache.bin file
    path: PathBuf,

    /// Print only the header
    #[arg(long)]
    header_only: bool,
}

pub fn execute(args: CacheInfoArgs) -> Result<()> {
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    let header = format::decode_header(&bytes)
        .with_context(|| format!("{} is not a shader cache", args.path.display()))?;
    println!("File:        {}", args.path.display());
    println!("Size:        {} bytes", bytes.len());
    println!("Version:     {}", header.version);
    println!("Vendor hash: {:08x}", header.fingerprint.vendor_hash);
    println!("Driver hash: {:08x}", header.fingerprint.driver_hash);
    println!("Written at:  {} (unix seconds)", header.timestamp);
    println!("Entries:     {}", header.entry_count);
    if args.header_only {
        return Ok(());
    }

    let file = format::decode(&bytes)
        .with_context(|| format!("{} has a corrupt entry table", args.path.display()))?;
    println!();
    println!(
        "{:<18} {:>8} {:>10} {:>8} {:>8}",
        "source hash", "format", "bytes", "vs len", "fs len"
    );
    let mut total = 0u64;
    for entry in &file.entries {
        total += entry.binary.len() as u64;
        println!(
            "{:016x}   {:>8x} {:>10} {:>8} {:>8}",
            entry.source_hash,
            entry.binary.format,
            entry.binary.len(),
            entry.vertex_len,
            entry.fragment_len
        );
    }
    println!();
    println!(
        "{} programs, {:.1} KB of binaries",
        file.entries.len(),
        total as f64 / 1024.0
    );
    Ok(())
}
