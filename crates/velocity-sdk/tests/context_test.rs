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

use approx::assert_relative_eq;
use std::convert::Infallible;
use velocity_core::renderer::{BufferTarget, BufferUsage, PrimitiveMode, ProgramId};
use velocity_core::{GpuCapabilities, VelocityConfig};
use velocity_infra::HeadlessDevice;
use velocity_lanes::BatchKey;
use velocity_sdk::{Backend, HeadlessHandles, VelocityContext};

const VS: &str = "attribute vec4 p; void main() { gl_Position = p; }";
const FS: &str = "precision mediump float; void main() { gl_FragColor = vec4(1.0); }";

fn config() -> VelocityConfig {
    VelocityConfig {
        buffer_pool_size_mb: 1,
        ..VelocityConfig::default()
    }
}

fn context(config: VelocityConfig) -> (VelocityContext, HeadlessHandles) {
    let (backend, handles) = Backend::headless();
    let context = VelocityContext::new(config, backend, 1920, 1080).unwrap();
    (context, handles)
}

fn link(handles: &HeadlessHandles) -> impl FnOnce(&str, &str) -> Result<ProgramId, Infallible> {
    let device = handles.device.clone();
    move |vs: &str, fs: &str| Ok::<_, Infallible>(device.link_program(vs, fs))
}

#[test]
fn shader_cache_is_warm_after_restart() {
    // --- 1. ARRANGE ---
    let dir = tempfile::tempdir().unwrap();
    let config = VelocityConfig {
        shader_cache_path: Some(dir.path().to_path_buf()),
        ..config()
    };
    let (first, first_handles) = context(config.clone());
    first.program(VS, FS, link(&first_handles)).unwrap();
    assert_eq!(first_handles.device.source_link_count(), 1);

    // --- 2. ACT ---
    drop(first);
    let (second, second_handles) = context(config);
    let program = second.program(VS, FS, link(&second_handles)).unwrap();

    // --- 3. ASSERT ---
    assert_ne!(program, ProgramId(0));
    assert_eq!(second_handles.device.source_link_count(), 0);
    assert_eq!(second.stats().shaders.hits, 1);
}

#[test]
fn missing_program_binary_support_always_links() {
    let caps = GpuCapabilities {
        program_binary: false,
        ..HeadlessDevice::full_capabilities()
    };
    let (backend, handles) = Backend::headless_with(caps);
    let context = VelocityContext::new(config(), backend, 1280, 720).unwrap();

    for _ in 0..3 {
        context.program(VS, FS, link(&handles)).unwrap();
    }

    assert!(!context.shader_cache().is_enabled());
    assert_eq!(handles.device.source_link_count(), 3);
}

#[test]
fn slow_frames_lower_the_render_resolution() {
    // --- 1. ARRANGE ---
    let config = VelocityConfig {
        min_resolution_scale: 0.5,
        max_resolution_scale: 1.0,
        target_fps: 60,
        enable_sharpening: false,
        ..config()
    };
    let (mut context, handles) = context(config);

    // --- 2. ACT ---
    let mut last = None;
    for _ in 0..60 {
        context.begin_frame();
        last = Some(context.end_frame(33.0));
    }

    // --- 3. ASSERT ---
    let resolution = last.and_then(|r| r.resolution).unwrap();
    assert_relative_eq!(resolution.scale, 0.5);
    assert_eq!(resolution.render_size, (960, 540));

    let info = context.begin_frame();
    assert_eq!((info.render_width, info.render_height), (960, 540));
    context.end_frame(33.0);

    let targets = handles.targets.snapshot();
    assert_eq!(targets.fullscreen_passes, 61);
    assert_eq!(targets.viewport, (0, 0, 1920, 1080));
    assert_eq!(targets.targets.len(), 1);
}

#[test]
fn frame_loop_batches_draws_and_streams_data() {
    // --- 1. ARRANGE ---
    let (mut context, handles) = context(config());
    let key = BatchKey::default();

    // --- 2. ACT ---
    let mut reports = Vec::new();
    for frame in 0..5u8 {
        context.begin_frame();
        let allocator = context.allocator().unwrap().clone();
        let upload = allocator.stream_alloc(64, Some(&[frame; 64][..])).unwrap();
        assert_eq!(upload.offset % 256, 0);

        let batcher = context.batcher_mut();
        batcher.set_key(key);
        for i in 0..5 {
            batcher.draw_arrays(PrimitiveMode::Triangles, i * 3, 3);
        }
        reports.push(context.end_frame(16.0));
    }

    // --- 3. ASSERT ---
    for report in &reports {
        assert_eq!(report.batching.batches, 1);
        assert_eq!(report.batching.executed, 1);
        assert_eq!(report.batching.saved, 4);
    }
    assert_eq!(handles.submissions.draw_submissions(), 5);
    // One fence per slice still in flight.
    assert_eq!(handles.device.fence_count(), 3);
    assert_eq!(context.stats().batching.submitted, 25);
}

#[test]
fn pooled_buffers_are_released_with_the_context() {
    let (context, handles) = context(config());
    let allocator = context.allocator().unwrap().clone();
    let baseline = handles.device.buffer_count();

    let pool = allocator
        .create_pool(BufferTarget::Vertex, BufferUsage::Dynamic, 1 << 20)
        .unwrap();
    let allocation = allocator.alloc(pool, 4096).unwrap();
    allocator.upload(&allocation, &[7; 4096], 0).unwrap();
    assert_eq!(handles.device.buffer_count(), baseline + 1);
    allocator.free(allocation).unwrap();

    drop(allocator);
    drop(context);
    assert_eq!(handles.device.buffer_count(), 0);
}

#[test]
fn stats_serialize_to_json() {
    let (mut context, _handles) = context(config());
    context.set_telemetry_interval(std::time::Duration::ZERO);
    context.begin_frame();
    let report = context.end_frame(20.0);

    assert!(report.window.is_some());
    let json = serde_json::to_value(context.stats()).unwrap();
    assert_eq!(json["frames"], 1);
    assert!(json["buffers"].is_object());
    assert!(json["resolution"]["scale"].is_number());
}
