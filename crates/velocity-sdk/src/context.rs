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

use crate::backend::Backend;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use velocity_control::{ResolutionController, ResolutionSettings, ResolutionStats};
use velocity_core::renderer::ProgramId;
use velocity_core::{GpuCapabilities, VelocityConfig};
use velocity_data::{BufferPoolAllocator, BufferPoolSettings, BufferPoolStats};
use velocity_io::{ShaderBinaryCache, ShaderCacheSettings, ShaderCacheStats};
use velocity_lanes::{BatchingSettings, DrawCallBatcher, FrameBatchStats};
use velocity_telemetry::{FrameWindow, TelemetryService};

/// Returned by [`VelocityContext::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Width the frame should be rendered at.
    pub render_width: u32,
    /// Height the frame should be rendered at.
    pub render_height: u32,
}

/// Returned by [`VelocityContext::end_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameReport {
    /// Frame number.
    pub frame: u64,
    /// The frame time passed in, in milliseconds.
    pub frame_time_ms: f32,
    /// Draw batching counters for the frame.
    pub batching: FrameBatchStats,
    /// Resolution controller state after the frame, when enabled.
    pub resolution: Option<ResolutionStats>,
    /// The telemetry window closed by this frame, if any.
    pub window: Option<FrameWindow>,
}

/// Aggregate statistics across every subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VelocityStats {
    /// Frames completed.
    pub frames: u64,
    /// Buffer pools, when pooling is enabled.
    pub buffers: Option<BufferPoolStats>,
    /// Shader binary cache.
    pub shaders: ShaderCacheStats,
    /// Draw batching since creation or the last reset.
    pub batching: FrameBatchStats,
    /// Dynamic resolution, when enabled.
    pub resolution: Option<ResolutionStats>,
}

/// The Velocity layer for one rendering context.
///
/// Owned by the render thread. The allocator and the shader cache are
/// internally synchronised and can be handed to loading threads through
/// [`VelocityContext::allocator`] and [`VelocityContext::shader_cache`].
#[derive(Debug)]
pub struct VelocityContext {
    config: VelocityConfig,
    capabilities: GpuCapabilities,
    allocator: Option<Arc<BufferPoolAllocator>>,
    shader_cache: Arc<ShaderBinaryCache>,
    batcher: DrawCallBatcher,
    resolution: Option<ResolutionController>,
    telemetry: TelemetryService,
    native: (u32, u32),
    frame: u64,
    in_frame: bool,
    shut_down: bool,
}

impl VelocityContext {
    /// Builds every subsystem for a `native_width` x `native_height` output.
    ///
    /// The configuration is validated first. When a shader cache path is
    /// configured, the persisted cache is loaded.
    /// ## Errors
    /// Fails if the streaming buffer or the offscreen render target cannot
    /// be created.
    pub fn new(
        config: VelocityConfig,
        backend: Backend,
        native_width: u32,
        native_height: u32,
    ) -> Result<Self> {
        let config = config.validated();
        let Backend {
            buffers,
            fences,
            programs,
            submitter,
            targets,
            capabilities,
        } = backend;

        log::info!(
            "Initializing Velocity on '{}' ({}), quality {:?}",
            capabilities.renderer,
            capabilities.version,
            config.quality
        );

        let allocator = if config.enable_buffer_pooling {
            let settings = BufferPoolSettings::from_config(&config);
            let allocator = BufferPoolAllocator::new(buffers, fences, &capabilities, &settings)
                .context("Failed to create the buffer pool allocator")?;
            Some(Arc::new(allocator))
        } else {
            log::info!("Buffer pooling disabled");
            None
        };

        let shader_cache = Arc::new(ShaderBinaryCache::new(
            programs,
            &capabilities,
            ShaderCacheSettings::from_config(&config),
        ));
        if shader_cache.cache_file_path().is_some() {
            shader_cache.load_from_disk();
        }

        let batcher = DrawCallBatcher::new(submitter, BatchingSettings::from_config(&config));

        let resolution = if config.enable_dynamic_resolution {
            let controller = ResolutionController::new(
                targets,
                ResolutionSettings::from_config(&config),
                native_width,
                native_height,
            )
            .context("Failed to create the dynamic resolution target")?;
            Some(controller)
        } else {
            None
        };

        log::info!("Velocity initialized ({}x{})", native_width, native_height);
        Ok(Self {
            config,
            capabilities,
            allocator,
            shader_cache,
            batcher,
            resolution,
            telemetry: TelemetryService::default(),
            native: (native_width, native_height),
            frame: 0,
            in_frame: false,
            shut_down: false,
        })
    }

    /// Starts a frame.
    ///
    /// Advances the streaming ring, clears the draw buffer and redirects
    /// rendering to the offscreen target when dynamic resolution is on.
    pub fn begin_frame(&mut self) -> FrameInfo {
        if self.in_frame {
            log::warn!("begin_frame called twice without end_frame (frame {})", self.frame);
        }
        self.in_frame = true;
        self.frame += 1;

        if let Some(allocator) = &self.allocator {
            allocator.stream_begin_frame();
        }
        self.batcher.begin_frame();
        let (render_width, render_height) = match self.resolution.as_mut() {
            Some(resolution) => resolution.begin_frame(),
            None => self.native,
        };

        FrameInfo {
            frame: self.frame,
            render_width,
            render_height,
        }
    }

    /// Ends a frame that took `frame_time_ms` milliseconds.
    ///
    /// Flushes batched draws, fences the streaming slice, upscales to the
    /// default target and feeds the frame time to the resolution controller
    /// and to telemetry.
    pub fn end_frame(&mut self, frame_time_ms: f32) -> FrameReport {
        if !self.in_frame {
            log::warn!("end_frame called without begin_frame");
        }
        self.in_frame = false;

        let batching = self.batcher.end_frame();
        if let Some(allocator) = &self.allocator {
            allocator.stream_end_frame();
        }
        let resolution = self.resolution.as_mut().map(|resolution| {
            resolution.end_frame();
            resolution.record_frame_time(frame_time_ms);
            resolution.stats()
        });

        self.telemetry.record_frame(frame_time_ms);
        let window = self.telemetry.tick();
        if window.is_some() {
            self.log_summary();
        }

        FrameReport {
            frame: self.frame,
            frame_time_ms,
            batching,
            resolution,
            window,
        }
    }

    /// Returns a cached program for these sources, or links and caches one.
    ///
    /// A program that links but cannot be cached is still returned.
    /// ## Errors
    /// Whatever `link` returns.
    pub fn program<E>(
        &self,
        vertex_source: &str,
        fragment_source: &str,
        link: impl FnOnce(&str, &str) -> std::result::Result<ProgramId, E>,
    ) -> std::result::Result<ProgramId, E> {
        if let Some(program) = self.shader_cache.get(vertex_source, fragment_source) {
            return Ok(program);
        }
        let program = link(vertex_source, fragment_source)?;
        if let Err(e) = self.shader_cache.store(vertex_source, fragment_source, program) {
            log::warn!("Failed to cache program {:?}: {}", program, e);
        }
        Ok(program)
    }

    /// Changes the output size.
    pub fn resize(&mut self, native_width: u32, native_height: u32) {
        self.native = (native_width, native_height);
        if let Some(resolution) = self.resolution.as_mut() {
            resolution.resize(native_width, native_height);
        }
    }

    /// The validated configuration.
    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// What the driver supports.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// The buffer pool allocator, when pooling is enabled.
    pub fn allocator(&self) -> Option<&Arc<BufferPoolAllocator>> {
        self.allocator.as_ref()
    }

    /// The shader binary cache.
    pub fn shader_cache(&self) -> &Arc<ShaderBinaryCache> {
        &self.shader_cache
    }

    /// The draw call batcher.
    pub fn batcher(&self) -> &DrawCallBatcher {
        &self.batcher
    }

    /// The draw call batcher, for submitting draws.
    pub fn batcher_mut(&mut self) -> &mut DrawCallBatcher {
        &mut self.batcher
    }

    /// The resolution controller, when dynamic resolution is enabled.
    pub fn resolution(&self) -> Option<&ResolutionController> {
        self.resolution.as_ref()
    }

    /// The resolution controller, for manual overrides.
    pub fn resolution_mut(&mut self) -> Option<&mut ResolutionController> {
        self.resolution.as_mut()
    }

    /// Frames completed or in flight.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Replaces the telemetry service with one summarising every `interval`.
    pub fn set_telemetry_interval(&mut self, interval: Duration) {
        self.telemetry = TelemetryService::new(interval);
    }

    /// Aggregate statistics across every subsystem.
    pub fn stats(&self) -> VelocityStats {
        VelocityStats {
            frames: self.frame,
            buffers: self.allocator.as_ref().map(|a| a.stats()),
            shaders: self.shader_cache.stats(),
            batching: self.batcher.total_stats(),
            resolution: self.resolution.as_ref().map(|r| r.stats()),
        }
    }

    /// Logs a summary of every subsystem.
    pub fn log_summary(&self) {
        let stats = self.stats();
        log::info!("--- Velocity Summary ---");
        log::info!(
            "  Draws: {} submitted, {} executed, {} saved in {} batches",
            stats.batching.submitted,
            stats.batching.executed,
            stats.batching.saved,
            stats.batching.batches
        );
        log::info!(
            "  Shaders: {} cached ({:.1} KB), hit rate {:.1}%",
            stats.shaders.entry_count,
            stats.shaders.total_bytes as f64 / 1024.0,
            stats.shaders.hit_rate() * 100.0
        );
        if let Some(buffers) = stats.buffers {
            log::info!(
                "  Buffers: {} pools, {:.2} / {:.2} MB used, {} live allocations",
                buffers.pool_count,
                buffers.used_bytes as f64 / (1024.0 * 1024.0),
                buffers.total_bytes as f64 / (1024.0 * 1024.0),
                buffers.live_allocations
            );
        }
        if let Some(resolution) = stats.resolution {
            log::info!(
                "  Resolution: {}x{} (scale {:.2}), {:.1} fps, {} resizes",
                resolution.render_size.0,
                resolution.render_size.1,
                resolution.scale,
                resolution.actual_fps,
                resolution.scale_changes
            );
        }
        log::info!("------------------------");
    }

    /// Persists the shader cache. Called automatically on drop.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down Velocity after {} frames", self.frame);
        match self.shader_cache.flush() {
            Ok(0) => {}
            Ok(count) => log::info!("Saved {} shader binaries", count),
            Err(e) => log::warn!("Failed to save the shader cache: {}", e),
        }
    }
}

impl Drop for VelocityContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velocity_core::renderer::PrimitiveMode;
    use velocity_lanes::BatchKey;

    fn config() -> VelocityConfig {
        VelocityConfig {
            buffer_pool_size_mb: 1,
            ..VelocityConfig::default()
        }
    }

    #[test]
    fn test_frame_numbers_advance() {
        let (backend, _handles) = Backend::headless();
        let mut context = VelocityContext::new(config(), backend, 1280, 720).unwrap();
        assert_eq!(context.begin_frame().frame, 1);
        context.end_frame(16.0);
        assert_eq!(context.begin_frame().frame, 2);
        context.end_frame(16.0);
        assert_eq!(context.stats().frames, 2);
    }

    #[test]
    fn test_disabled_subsystems_are_absent() {
        let (backend, handles) = Backend::headless();
        let config = VelocityConfig {
            enable_buffer_pooling: false,
            enable_dynamic_resolution: false,
            ..config()
        };
        let mut context = VelocityContext::new(config, backend, 800, 600).unwrap();
        assert!(context.allocator().is_none());
        assert!(context.resolution().is_none());
        assert_eq!(handles.device.buffer_count(), 0);

        let info = context.begin_frame();
        assert_eq!((info.render_width, info.render_height), (800, 600));
        let report = context.end_frame(16.0);
        assert!(report.resolution.is_none());
    }

    #[test]
    fn test_end_frame_flushes_draws() {
        let (backend, handles) = Backend::headless();
        let mut context = VelocityContext::new(config(), backend, 1280, 720).unwrap();
        context.begin_frame();
        let batcher = context.batcher_mut();
        batcher.set_key(BatchKey::default());
        for i in 0..4 {
            batcher.draw_arrays(PrimitiveMode::Triangles, i * 3, 3);
        }
        let report = context.end_frame(16.0);
        assert_eq!(report.batching.submitted, 4);
        assert_eq!(report.batching.executed, 1);
        assert_eq!(handles.submissions.draw_submissions(), 1);
    }
}
