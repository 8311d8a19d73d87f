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

//! Runtime configuration for the optimization layer.
//!
//! The configuration is a flat JSON document with camelCase keys. Every key
//! is optional; anything missing takes the value from [`VelocityConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Hard lower bound for any resolution scale.
pub const MIN_RESOLUTION_SCALE: f32 = 0.25;
/// Hard upper bound for any resolution scale.
pub const MAX_RESOLUTION_SCALE: f32 = 2.0;

/// Errors raised while loading or saving a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config I/O error on {path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse quality tiers, each mapping to a full configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityPreset {
    /// Lowest-end devices: aggressive scaling, 30 fps target.
    UltraLow,
    /// Entry-level devices.
    Low,
    /// Mid-range devices.
    #[default]
    Medium,
    /// Upper mid-range devices.
    High,
    /// Flagship devices: native resolution, dynamic resolution off.
    Ultra,
}

impl QualityPreset {
    /// Every preset, from lowest to highest.
    pub const ALL: [QualityPreset; 5] = [
        QualityPreset::UltraLow,
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::Ultra,
    ];

    /// Parses a preset name such as `"ultra-low"` or `"HIGH"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "ultra-low" | "ultralow" => Some(Self::UltraLow),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "ultra" => Some(Self::Ultra),
            _ => None,
        }
    }
}

/// How the offscreen color target is resampled onto the default target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpscaleMethod {
    /// Point sampling.
    Nearest,
    /// Hardware bilinear filtering.
    #[default]
    Bilinear,
    /// Four-tap bicubic filter in the upscale shader.
    Bicubic,
    /// Edge-adaptive spatial upscaling.
    Fsr,
    /// Contrast-adaptive sharpening on top of bilinear.
    Cas,
}

/// The full set of knobs consumed when a context is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VelocityConfig {
    /// The preset this configuration was derived from.
    pub quality: QualityPreset,

    /// Sort and merge compatible draw calls.
    pub enable_draw_batching: bool,
    /// Allow instanced submissions through the batcher.
    pub enable_instancing: bool,
    /// Batch size hint; the command buffer holds eight times this many commands.
    pub max_batch_size: u32,
    /// Shortest run of compatible commands that gets merged.
    pub min_batch_size: u32,

    /// Sub-allocate geometry out of large pools.
    pub enable_buffer_pooling: bool,
    /// Size of the per-frame streaming ring, in MiB.
    #[serde(rename = "bufferPoolSizeMB", alias = "bufferPoolSize")]
    pub buffer_pool_size_mb: u32,
    /// Use persistent coherent mappings when the driver supports them.
    pub enable_persistent_mapping: bool,

    /// Byte budget of the in-memory shader binary cache.
    #[serde(alias = "shaderCacheMaxSize")]
    pub shader_cache_max_size_bytes: u64,
    /// Directory holding `shader_cache.bin`; `None` keeps the cache in memory only.
    pub shader_cache_path: Option<PathBuf>,

    /// Adapt render resolution to frame time.
    pub enable_dynamic_resolution: bool,
    /// Lowest scale the controller may choose.
    pub min_resolution_scale: f32,
    /// Highest scale the controller may choose; also the starting scale.
    pub max_resolution_scale: f32,
    /// Frame rate the controller steers towards.
    #[serde(rename = "targetFPS", alias = "targetFps")]
    pub target_fps: u32,
    /// Gain applied to the frame-time deviation per adjustment.
    pub resolution_adjust_speed: f32,
    /// Filter used to present the scaled frame.
    pub upscale_method: UpscaleMethod,
    /// Run contrast-adaptive sharpening during the upscale pass.
    pub enable_sharpening: bool,
    /// Sharpening strength in `[0, 1]`.
    pub sharpen_amount: f32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            quality: QualityPreset::Medium,
            enable_draw_batching: true,
            enable_instancing: true,
            max_batch_size: 128,
            min_batch_size: 2,
            enable_buffer_pooling: true,
            buffer_pool_size_mb: 32,
            enable_persistent_mapping: true,
            shader_cache_max_size_bytes: 64 * 1024 * 1024,
            shader_cache_path: None,
            enable_dynamic_resolution: true,
            min_resolution_scale: 0.5,
            max_resolution_scale: 1.0,
            target_fps: 60,
            resolution_adjust_speed: 0.1,
            upscale_method: UpscaleMethod::Bilinear,
            enable_sharpening: true,
            sharpen_amount: 0.3,
        }
    }
}

impl VelocityConfig {
    /// Builds the configuration for a quality preset.
    pub fn preset(quality: QualityPreset) -> Self {
        let base = Self {
            quality,
            ..Self::default()
        };
        match quality {
            QualityPreset::UltraLow => Self {
                min_resolution_scale: 0.25,
                max_resolution_scale: 0.5,
                target_fps: 30,
                enable_instancing: false,
                max_batch_size: 32,
                buffer_pool_size_mb: 8,
                ..base
            },
            QualityPreset::Low => Self {
                min_resolution_scale: 0.4,
                max_resolution_scale: 0.7,
                target_fps: 30,
                max_batch_size: 64,
                buffer_pool_size_mb: 16,
                ..base
            },
            QualityPreset::Medium => Self {
                min_resolution_scale: 0.5,
                max_resolution_scale: 1.0,
                target_fps: 45,
                max_batch_size: 128,
                buffer_pool_size_mb: 32,
                ..base
            },
            QualityPreset::High => Self {
                min_resolution_scale: 0.7,
                max_resolution_scale: 1.0,
                target_fps: 60,
                max_batch_size: 192,
                buffer_pool_size_mb: 48,
                ..base
            },
            QualityPreset::Ultra => Self {
                enable_dynamic_resolution: false,
                min_resolution_scale: 0.85,
                max_resolution_scale: 1.0,
                target_fps: 60,
                max_batch_size: 256,
                buffer_pool_size_mb: 64,
                ..base
            },
        }
    }

    /// Loads a configuration file.
    ///
    /// A missing file is not an error: a warning is logged and the defaults
    /// are returned. Unreadable or malformed files are errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::info!("Loading configuration from: {}", path.display());

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&text)?;
        Ok(config.validated())
    }

    /// Writes the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        log::info!("Saving configuration to: {}", path.display());

        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Returns a copy with every numeric field forced into its legal range.
    ///
    /// Scales are clamped to `[0.25, 2.0]` and reordered if min exceeds max;
    /// sizes and rates are raised to at least one.
    pub fn validated(mut self) -> Self {
        let clamp = |s: f32| {
            if s.is_finite() {
                s.clamp(MIN_RESOLUTION_SCALE, MAX_RESOLUTION_SCALE)
            } else {
                1.0
            }
        };
        self.min_resolution_scale = clamp(self.min_resolution_scale);
        self.max_resolution_scale = clamp(self.max_resolution_scale);
        if self.min_resolution_scale > self.max_resolution_scale {
            log::warn!(
                "minResolutionScale {} exceeds maxResolutionScale {}, swapping",
                self.min_resolution_scale,
                self.max_resolution_scale
            );
            std::mem::swap(
                &mut self.min_resolution_scale,
                &mut self.max_resolution_scale,
            );
        }
        self.target_fps = self.target_fps.max(1);
        self.max_batch_size = self.max_batch_size.max(1);
        self.min_batch_size = self.min_batch_size.max(1);
        self.buffer_pool_size_mb = self.buffer_pool_size_mb.max(1);
        if !self.resolution_adjust_speed.is_finite() || self.resolution_adjust_speed < 0.0 {
            self.resolution_adjust_speed = 0.1;
        }
        if !self.sharpen_amount.is_finite() {
            self.sharpen_amount = 0.0;
        }
        self.sharpen_amount = self.sharpen_amount.clamp(0.0, 1.0);
        self
    }
}
