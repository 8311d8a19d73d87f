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

use super::upscale::UpscaleParams;
use crate::metrics::RingBuffer;
use serde::Serialize;
use velocity_core::config::{UpscaleMethod, MAX_RESOLUTION_SCALE, MIN_RESOLUTION_SCALE};
use velocity_core::renderer::{
    FullscreenPass, RenderTargetDescriptor, RenderTargetId, RenderTargetProvider, ResourceError,
};
use velocity_core::VelocityConfig;

/// Frame time samples kept for the rolling average.
pub const FRAME_HISTORY: usize = 60;

/// Relative frame time error below which the scale is left alone.
pub const DEVIATION_THRESHOLD: f32 = 0.1;

/// Smallest scale change worth applying.
pub const MIN_SCALE_STEP: f32 = 0.01;

/// Smallest render target edge, in pixels.
pub const MIN_RENDER_DIMENSION: u32 = 64;

/// Tuning for a [`ResolutionController`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionSettings {
    /// Render offscreen and adapt the scale.
    pub enabled: bool,
    /// Lower scale bound.
    pub min_scale: f32,
    /// Upper scale bound, also the starting scale.
    pub max_scale: f32,
    /// Frame rate the controller steers towards.
    pub target_fps: u32,
    /// Scale change per unit of relative frame time error.
    pub adjust_speed: f32,
    /// Resampling filter when sharpening is off.
    pub upscale_method: UpscaleMethod,
    /// Use contrast-adaptive sharpening for the upscale pass.
    pub sharpening: bool,
    /// Sharpening strength in `[0, 1]`.
    pub sharpen_amount: f32,
}

impl ResolutionSettings {
    /// Reads the dynamic resolution section of a configuration.
    pub fn from_config(config: &VelocityConfig) -> Self {
        Self {
            enabled: config.enable_dynamic_resolution,
            min_scale: config.min_resolution_scale,
            max_scale: config.max_resolution_scale,
            target_fps: config.target_fps,
            adjust_speed: config.resolution_adjust_speed,
            upscale_method: config.upscale_method,
            sharpening: config.enable_sharpening,
            sharpen_amount: config.sharpen_amount,
        }
        .sanitized()
    }

    /// Frame time the controller steers towards, in milliseconds.
    pub fn target_frame_time(&self) -> f32 {
        1000.0 / self.target_fps.max(1) as f32
    }

    fn sanitized(mut self) -> Self {
        let clamp = |s: f32| {
            if s.is_finite() {
                s.clamp(MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE)
            } else {
                1.0
            }
        };
        self.min_scale = clamp(self.min_scale);
        self.max_scale = clamp(self.max_scale);
        if self.min_scale > self.max_scale {
            std::mem::swap(&mut self.min_scale, &mut self.max_scale);
        }
        self.target_fps = self.target_fps.max(1);
        if !self.adjust_speed.is_finite() || self.adjust_speed < 0.0 {
            self.adjust_speed = 0.0;
        }
        self
    }
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self::from_config(&VelocityConfig::default())
    }
}

/// A point-in-time view of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolutionStats {
    /// Current render scale.
    pub scale: f32,
    /// Offscreen target size.
    pub render_size: (u32, u32),
    /// Output size.
    pub native_size: (u32, u32),
    /// Frame rate derived from the rolling average.
    pub actual_fps: f32,
    /// Rolling average frame time, in milliseconds.
    pub average_frame_time: f32,
    /// Times the render target size changed.
    pub scale_changes: u64,
}

/// Closed-loop render scale controller.
///
/// Invariant: `min_scale <= scale() <= max_scale` after every call.
#[derive(Debug)]
pub struct ResolutionController {
    targets: Box<dyn RenderTargetProvider>,
    settings: ResolutionSettings,
    native: (u32, u32),
    render: (u32, u32),
    scale: f32,
    target: Option<RenderTargetId>,
    history: RingBuffer<f32, FRAME_HISTORY>,
    actual_fps: f32,
    scale_changes: u64,
}

impl ResolutionController {
    /// Creates a controller for a `native_width` x `native_height` output.
    ///
    /// Starts at the maximum scale. When enabled the offscreen target is
    /// created immediately.
    /// ## Errors
    /// * `ResourceError` - If the offscreen target cannot be created.
    pub fn new(
        targets: Box<dyn RenderTargetProvider>,
        settings: ResolutionSettings,
        native_width: u32,
        native_height: u32,
    ) -> Result<Self, ResourceError> {
        let settings = settings.sanitized();
        let native = (native_width.max(1), native_height.max(1));
        let mut controller = Self {
            targets,
            scale: settings.max_scale,
            render: render_size(native, settings.max_scale),
            settings,
            native,
            target: None,
            history: RingBuffer::new(),
            actual_fps: 0.0,
            scale_changes: 0,
        };
        if settings.enabled {
            controller.create_target()?;
        }
        log::info!(
            "ResolutionController: native {}x{}, render {}x{} (scale {:.2})",
            native.0,
            native.1,
            controller.render.0,
            controller.render.1,
            controller.scale
        );
        Ok(controller)
    }

    /// Redirects rendering to the offscreen target.
    ///
    /// Returns the dimensions the frame should be rendered at: the render
    /// size when enabled, the native size otherwise. A target lost to a
    /// failed reallocation is recreated here; until that succeeds the frame
    /// renders at native size.
    pub fn begin_frame(&mut self) -> (u32, u32) {
        if self.settings.enabled && self.target.is_none() {
            if let Err(e) = self.create_target() {
                log::debug!(
                    "ResolutionController: render target still unavailable: {:?}",
                    e
                );
            }
        }
        match self.target {
            Some(target) => {
                self.targets.bind_render_target(Some(target));
                self.targets.set_viewport(0, 0, self.render.0, self.render.1);
                self.render
            }
            None => self.native,
        }
    }

    /// Resamples the offscreen target onto the default target.
    pub fn end_frame(&mut self) {
        let Some(source) = self.target else {
            return;
        };
        let method = self.upscale_method();
        let sharpness = if method == UpscaleMethod::Cas {
            self.settings.sharpen_amount
        } else {
            0.0
        };
        let params = UpscaleParams::new(self.render, self.native, sharpness);

        self.targets.bind_render_target(None);
        self.targets.set_viewport(0, 0, self.native.0, self.native.1);
        self.targets.set_depth_test(false);
        self.targets.set_blend(false);
        self.targets.draw_fullscreen(&FullscreenPass {
            source,
            method,
            params: params.as_bytes(),
        });
        self.targets.set_depth_test(true);
    }

    /// Feeds one frame's duration and adapts the scale.
    ///
    /// Samples are always recorded; the scale only moves while enabled.
    /// Non-finite or non-positive samples are ignored.
    pub fn record_frame_time(&mut self, frame_time_ms: f32) {
        if !frame_time_ms.is_finite() || frame_time_ms <= 0.0 {
            log::trace!("ResolutionController: ignoring frame time {frame_time_ms}");
            return;
        }
        self.history.push(frame_time_ms);
        let average = self.history.average();
        self.actual_fps = 1000.0 / average;

        if !self.settings.enabled {
            return;
        }

        let target = self.settings.target_frame_time();
        let deviation = (average - target) / target;
        if deviation.abs() <= DEVIATION_THRESHOLD {
            return;
        }

        let proposed = (self.scale - deviation * self.settings.adjust_speed)
            .clamp(self.settings.min_scale, self.settings.max_scale);
        if (proposed - self.scale).abs() > MIN_SCALE_STEP {
            log::trace!(
                "ResolutionController: avg {:.2} ms vs {:.2} ms, scale {:.3} -> {:.3}",
                average,
                target,
                self.scale,
                proposed
            );
            self.apply_scale(proposed);
        }
    }

    /// Forces a scale, clamped to the configured bounds.
    pub fn set_scale(&mut self, scale: f32) {
        if !scale.is_finite() {
            log::warn!("ResolutionController: ignoring scale {scale}");
            return;
        }
        self.apply_scale(scale.clamp(self.settings.min_scale, self.settings.max_scale));
    }

    /// Changes the output size, keeping the current scale.
    pub fn resize(&mut self, native_width: u32, native_height: u32) {
        self.native = (native_width.max(1), native_height.max(1));
        log::info!(
            "ResolutionController: resized to {}x{}",
            self.native.0,
            self.native.1
        );
        self.apply_scale(self.scale);
    }

    /// Turns offscreen rendering on or off, creating or destroying the target.
    /// ## Errors
    /// * `ResourceError` - If the offscreen target cannot be created.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), ResourceError> {
        if enabled == self.settings.enabled {
            return Ok(());
        }
        self.settings.enabled = enabled;
        if enabled {
            self.create_target()
        } else {
            self.destroy_target();
            Ok(())
        }
    }

    /// Whether offscreen rendering is on.
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Switches between contrast-adaptive sharpening and the plain filter.
    pub fn set_sharpening(&mut self, enabled: bool, amount: f32) {
        self.settings.sharpening = enabled;
        if amount.is_finite() {
            self.settings.sharpen_amount = amount.clamp(0.0, 1.0);
        }
    }

    /// Sets the filter used when sharpening is off.
    pub fn set_upscale_method(&mut self, method: UpscaleMethod) {
        self.settings.upscale_method = method;
    }

    /// The filter the next upscale pass will use.
    pub fn upscale_method(&self) -> UpscaleMethod {
        if self.settings.sharpening {
            UpscaleMethod::Cas
        } else {
            self.settings.upscale_method
        }
    }

    /// Replaces the settings and re-clamps the current scale.
    /// ## Errors
    /// * `ResourceError` - If enabling requires a target that cannot be created.
    pub fn set_settings(&mut self, settings: ResolutionSettings) -> Result<(), ResourceError> {
        let settings = settings.sanitized();
        let enabled = settings.enabled;
        self.settings = ResolutionSettings {
            enabled: self.settings.enabled,
            ..settings
        };
        self.apply_scale(self.scale.clamp(settings.min_scale, settings.max_scale));
        self.set_enabled(enabled)
    }

    /// The active settings.
    pub fn settings(&self) -> &ResolutionSettings {
        &self.settings
    }

    /// Current render scale.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Offscreen target size.
    pub fn render_size(&self) -> (u32, u32) {
        self.render
    }

    /// Output size.
    pub fn native_size(&self) -> (u32, u32) {
        self.native
    }

    /// The offscreen target, while enabled.
    pub fn target(&self) -> Option<RenderTargetId> {
        self.target
    }

    /// Frame rate derived from the rolling average frame time.
    pub fn actual_fps(&self) -> f32 {
        self.actual_fps
    }

    /// Rolling average over the recorded samples, in milliseconds.
    pub fn average_frame_time(&self) -> f32 {
        self.history.average()
    }

    /// Shortest and longest frame in the history, in milliseconds.
    pub fn frame_time_range(&self) -> (f32, f32) {
        (self.history.min(), self.history.max())
    }

    /// Times the render target size changed.
    pub fn scale_changes(&self) -> u64 {
        self.scale_changes
    }

    /// A snapshot of the controller state.
    pub fn stats(&self) -> ResolutionStats {
        ResolutionStats {
            scale: self.scale,
            render_size: self.render,
            native_size: self.native,
            actual_fps: self.actual_fps,
            average_frame_time: self.average_frame_time(),
            scale_changes: self.scale_changes,
        }
    }

    fn apply_scale(&mut self, scale: f32) {
        self.scale = scale;
        let size = render_size(self.native, scale);
        if size == self.render {
            return;
        }
        self.render = size;
        self.scale_changes += 1;
        log::debug!(
            "ResolutionController: render size {}x{} (scale {:.2})",
            size.0,
            size.1,
            scale
        );
        if self.settings.enabled {
            self.destroy_target();
            if let Err(e) = self.create_target() {
                log::warn!(
                    "ResolutionController: Failed to reallocate render target, rendering at native size: {:?}",
                    e
                );
            }
        }
    }

    fn create_target(&mut self) -> Result<(), ResourceError> {
        let id = self.targets.create_render_target(&RenderTargetDescriptor {
            label: Some("velocity_dynamic_resolution".to_string()),
            width: self.render.0,
            height: self.render.1,
            depth: true,
        })?;
        self.target = Some(id);
        Ok(())
    }

    fn destroy_target(&mut self) {
        if let Some(id) = self.target.take() {
            if let Err(e) = self.targets.destroy_render_target(id) {
                log::warn!(
                    "ResolutionController: Failed to destroy render target {:?}: {:?}",
                    id,
                    e
                );
            }
        }
    }
}

impl Drop for ResolutionController {
    fn drop(&mut self) {
        self.destroy_target();
    }
}

/// Render size for `scale`: each edge rounded up to even and clamped to
/// `[64, 2 * native]`.
pub fn render_size(native: (u32, u32), scale: f32) -> (u32, u32) {
    (
        render_dimension(native.0, scale),
        render_dimension(native.1, scale),
    )
}

fn render_dimension(native: u32, scale: f32) -> u32 {
    let scaled = (native as f32 * scale) as u32;
    let even = scaled + (scaled & 1);
    even.clamp(MIN_RENDER_DIMENSION, native.saturating_mul(2).max(MIN_RENDER_DIMENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use velocity_infra::{HeadlessTargets, TargetLog};

    fn settings() -> ResolutionSettings {
        ResolutionSettings {
            enabled: true,
            min_scale: 0.5,
            max_scale: 1.0,
            target_fps: 60,
            adjust_speed: 0.1,
            upscale_method: UpscaleMethod::Bilinear,
            sharpening: false,
            sharpen_amount: 0.3,
        }
    }

    fn controller(settings: ResolutionSettings) -> (ResolutionController, TargetLog) {
        let targets = HeadlessTargets::default();
        let log = targets.log();
        let controller = ResolutionController::new(Box::new(targets), settings, 1920, 1080)
            .expect("headless target");
        (controller, log)
    }

    #[test]
    fn test_starts_at_max_scale() {
        let (controller, log) = controller(settings());
        assert_relative_eq!(controller.scale(), 1.0);
        assert_eq!(controller.render_size(), (1920, 1080));
        assert_eq!(log.snapshot().targets.len(), 1);
    }

    #[test]
    fn test_slow_frames_drive_scale_to_min() {
        let (mut controller, _log) = controller(settings());
        for _ in 0..60 {
            controller.record_frame_time(33.0);
            assert!(controller.scale() >= 0.5);
            assert!(controller.scale() <= 1.0);
        }
        assert_relative_eq!(controller.scale(), 0.5);
        assert_eq!(controller.render_size(), (960, 540));
        assert_relative_eq!(controller.actual_fps(), 1000.0 / 33.0, epsilon = 1e-3);
    }

    #[test]
    fn test_fast_frames_recover_scale() {
        let (mut controller, _log) = controller(settings());
        controller.set_scale(0.5);
        for _ in 0..60 {
            controller.record_frame_time(8.0);
        }
        assert_relative_eq!(controller.scale(), 1.0);
    }

    #[test]
    fn test_on_target_frames_leave_scale_alone() {
        let (mut controller, _log) = controller(settings());
        controller.set_scale(0.75);
        for _ in 0..30 {
            controller.record_frame_time(17.5);
        }
        assert_relative_eq!(controller.scale(), 0.75);
    }

    #[test]
    fn test_disabled_records_but_does_not_adapt() {
        let (mut controller, log) = controller(ResolutionSettings {
            enabled: false,
            ..settings()
        });
        assert!(log.snapshot().targets.is_empty());
        for _ in 0..10 {
            controller.record_frame_time(40.0);
        }
        assert_relative_eq!(controller.scale(), 1.0);
        assert_relative_eq!(controller.average_frame_time(), 40.0);
        assert_eq!(controller.begin_frame(), (1920, 1080));
    }

    #[test]
    fn test_set_scale_is_clamped() {
        let (mut controller, _log) = controller(settings());
        controller.set_scale(0.1);
        assert_relative_eq!(controller.scale(), 0.5);
        controller.set_scale(3.0);
        assert_relative_eq!(controller.scale(), 1.0);
        controller.set_scale(f32::NAN);
        assert_relative_eq!(controller.scale(), 1.0);
    }

    #[test]
    fn test_target_reallocated_only_when_size_changes() {
        let (mut controller, log) = controller(settings());
        controller.set_scale(0.75);
        assert_eq!(controller.scale_changes(), 1);
        assert_eq!(log.snapshot().created, 2);

        // 0.7505 still renders at 1440x810.
        controller.set_scale(0.7505);
        assert_eq!(controller.scale_changes(), 1);
        assert_eq!(log.snapshot().created, 2);
        assert_eq!(log.snapshot().targets.len(), 1);
    }

    #[test]
    fn test_render_size_rounding_and_bounds() {
        assert_eq!(render_size((1000, 1000), 0.5), (500, 500));
        assert_eq!(render_size((1001, 1001), 0.5), (500, 500));
        assert_eq!(render_size((1002, 1002), 0.5), (502, 502));
        assert_eq!(render_size((100, 100), 0.25), (64, 64));
        assert_eq!(render_size((20, 20), 2.0), (64, 64));
    }

    #[test]
    fn test_frame_lifecycle_binds_and_upscales() {
        let (mut controller, log) = controller(settings());
        controller.set_scale(0.5);
        assert_eq!(controller.begin_frame(), (960, 540));
        let state = log.snapshot();
        assert_eq!(state.bound, controller.target());
        assert_eq!(state.viewport, (0, 0, 960, 540));

        controller.end_frame();
        let state = log.snapshot();
        assert_eq!(state.bound, None);
        assert_eq!(state.viewport, (0, 0, 1920, 1080));
        assert!(state.depth_test);
        assert!(!state.blend);
        assert_eq!(state.fullscreen_passes, 1);
        assert_eq!(
            state.last_pass,
            controller.target().map(|t| (t, UpscaleMethod::Bilinear))
        );
        let params: UpscaleParams = bytemuck::pod_read_unaligned(&state.last_params);
        assert_eq!(params.source_size, [960.0, 540.0]);
        assert_eq!(params.output_size, [1920.0, 1080.0]);
    }

    #[test]
    fn test_sharpening_selects_cas() {
        let (mut controller, log) = controller(settings());
        controller.set_upscale_method(UpscaleMethod::Nearest);
        assert_eq!(controller.upscale_method(), UpscaleMethod::Nearest);
        controller.set_sharpening(true, 0.6);
        controller.begin_frame();
        controller.end_frame();

        let state = log.snapshot();
        assert_eq!(state.last_pass.map(|(_, m)| m), Some(UpscaleMethod::Cas));
        let params: UpscaleParams = bytemuck::pod_read_unaligned(&state.last_params);
        assert_relative_eq!(params.sharpness, 0.6);
    }

    #[test]
    fn test_toggle_creates_and_destroys_target() {
        let (mut controller, log) = controller(settings());
        controller.set_enabled(false).unwrap();
        assert!(controller.target().is_none());
        assert!(log.snapshot().targets.is_empty());

        controller.end_frame();
        assert_eq!(log.snapshot().fullscreen_passes, 0);

        controller.set_enabled(true).unwrap();
        assert!(controller.target().is_some());
    }

    #[test]
    fn test_resize_keeps_scale() {
        let (mut controller, log) = controller(settings());
        controller.set_scale(0.5);
        controller.resize(1280, 720);
        assert_relative_eq!(controller.scale(), 0.5);
        assert_eq!(controller.render_size(), (640, 360));
        let state = log.snapshot();
        assert_eq!(state.targets.values().next(), Some(&(640, 360)));
    }

    #[test]
    fn test_set_settings_reclamps() {
        let (mut controller, _log) = controller(settings());
        controller
            .set_settings(ResolutionSettings {
                min_scale: 0.3,
                max_scale: 0.6,
                ..settings()
            })
            .unwrap();
        assert_relative_eq!(controller.scale(), 0.6);
        assert!(controller.is_enabled());
    }

    #[test]
    fn test_failed_reallocation_recovers_on_next_size_change() {
        let targets = HeadlessTargets::new(2000);
        let log = targets.log();
        let mut controller = ResolutionController::new(
            Box::new(targets),
            ResolutionSettings {
                max_scale: 2.0,
                ..settings()
            },
            1000,
            1000,
        )
        .expect("headless target");
        controller.set_scale(1.0);
        controller.resize(1500, 1500);
        assert!(controller.target().is_some());

        // 3000x3000 exceeds the provider limit.
        controller.set_scale(2.0);
        assert!(controller.target().is_none());
        assert!(controller.is_enabled());
        assert_eq!(controller.begin_frame(), (1500, 1500));
        assert!(log.snapshot().targets.is_empty());

        controller.set_scale(0.5);
        assert_eq!(controller.render_size(), (750, 750));
        assert!(controller.target().is_some());
        assert_eq!(controller.begin_frame(), (750, 750));
        let state = log.snapshot();
        assert_eq!(state.targets.values().next(), Some(&(750, 750)));
        assert_eq!(state.bound, controller.target());

        // A resize alone also brings the target back.
        controller.set_scale(2.0);
        assert!(controller.target().is_none());
        controller.resize(900, 900);
        assert_eq!(controller.render_size(), (1800, 1800));
        assert!(controller.target().is_some());
    }

    #[test]
    fn test_drop_releases_target() {
        let (controller, log) = controller(settings());
        drop(controller);
        assert!(log.snapshot().targets.is_empty());
    }
}
