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
use std::convert::Infallible;
use std::path::PathBuf;
use velocity_sdk::prelude::*;

#[derive(Args)]
pub struct SimulateArgs {
    /// JSON configuration file; the preset is used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quality preset: ultra-low, low, medium, high or ultra
    #[arg(long, default_value = "medium")]
    preset: String,

    /// Directory for the persisted shader cache
    #[arg(long)]
    shader_cache: Option<PathBuf>,

    /// Frames to run
    #[arg(long, default_value_t = 300)]
    frames: u32,

    /// Output width in pixels
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Output height in pixels
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Draws submitted per frame
    #[arg(long, default_value_t = 200)]
    draws: u32,

    /// Distinct shader programs
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
    programs: u32,

    /// Fixed CPU cost per frame, in milliseconds
    #[arg(long, default_value_t = 4.0)]
    cpu_ms: f32,

    /// Driver cost per draw submission, in microseconds
    #[arg(long, default_value_t = 40.0)]
    draw_cost_us: f32,

    /// GPU cost of a frame at native resolution, in milliseconds
    #[arg(long, default_value_t = 24.0)]
    gpu_ms: f32,

    /// Print the final statistics as JSON
    #[arg(long)]
    json: bool,
}

fn shader_sources(index: u32) -> (String, String) {
    let vertex = format!(
        "uniform mat4 u_mvp_{index};\nattribute vec4 a_position;\n         void main() {{ gl_Position = u_mvp_{index} * a_position; }}"
    );
    let fragment = format!(
        "precision mediump float;\nuniform vec4 u_tint_{index};\n         void main() {{ gl_FragColor = u_tint_{index}; }}"
    );
    (vertex, fragment)
}

pub fn execute(args: SimulateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => VelocityConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let quality = QualityPreset::from_name(&args.preset)
                .with_context(|| format!("unknown preset '{}'", args.preset))?;
            VelocityConfig::preset(quality)
        }
    };
    if args.shader_cache.is_some() {
        config.shader_cache_path = args.shader_cache.clone();
    }

    let (backend, handles) = Backend::headless();
    let mut context = VelocityContext::new(config, backend, args.width, args.height)
        .context("Failed to initialize Velocity")?;

    let programs = (0..args.programs)
        .map(|i| {
            let (vs, fs) = shader_sources(i);
            context.program(&vs, &fs, |vs, fs| {
                Ok::<_, Infallible>(handles.device.link_program(vs, fs))
            })
        })
        .collect::<Result<Vec<ProgramId>, _>>()?;
    log::info!(
        "{} programs ready, {} linked from source",
        programs.len(),
        handles.device.source_link_count()
    );

    let native_pixels = args.width as f32 * args.height as f32;
    let uniform_bytes = u64::from(args.draws) * 64;
    let mut last_executed = u64::from(args.draws);

    for frame in 0..args.frames as usize {
        let info = context.begin_frame();

        if let Some(allocator) = context.allocator() {
            if allocator.stream_alloc(uniform_bytes, None).is_none() {
                log::debug!("Frame {}: uniform upload did not fit the stream slice", info.frame);
            }
        }

        let batcher = context.batcher_mut();
        for i in 0..args.draws {
            let program = programs[(i as usize * 7 + frame) % programs.len()];
            batcher.set_key(
                BatchKey::new(program, VertexLayoutId(1)).with_texture0(TextureId(i % 4)),
            );
            batcher.draw_elements(
                PrimitiveMode::Triangles,
                36,
                IndexType::U16,
                u64::from(i) * 72,
            );
        }

        // Submissions are costed one frame late, as a pipelined driver would.
        let render_pixels = info.render_width as f32 * info.render_height as f32;
        let frame_ms = args.cpu_ms
            + last_executed as f32 * args.draw_cost_us / 1000.0
            + args.gpu_ms * render_pixels / native_pixels;
        let report = context.end_frame(frame_ms);
        last_executed = report.batching.executed;

        log::debug!(
            "Frame {}: {:.2} ms at {}x{}, {} draws in {} submissions",
            report.frame,
            frame_ms,
            info.render_width,
            info.render_height,
            report.batching.submitted,
            report.batching.executed
        );
    }

    context.log_summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&context.stats())?);
    }
    context.shutdown();
    Ok(())
}
