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

use bytemuck::{Pod, Zeroable};

/// Uniform block consumed by the full-screen upscale shader.
///
/// Layout matches a std140 block of two `vec4`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UpscaleParams {
    /// Render target size in pixels.
    pub source_size: [f32; 2],
    /// Output size in pixels.
    pub output_size: [f32; 2],
    /// Reciprocal of `source_size`, for texel offsets.
    pub texel_size: [f32; 2],
    /// Sharpening strength in `[0, 1]`; zero disables the sharpening tap.
    pub sharpness: f32,
    /// Keeps the block a multiple of 16 bytes.
    pub _padding: f32,
}

impl UpscaleParams {
    /// Parameters for resampling `source` onto `output`.
    pub fn new(source: (u32, u32), output: (u32, u32), sharpness: f32) -> Self {
        let (sw, sh) = (source.0.max(1) as f32, source.1.max(1) as f32);
        Self {
            source_size: [sw, sh],
            output_size: [output.0 as f32, output.1 as f32],
            texel_size: [1.0 / sw, 1.0 / sh],
            sharpness: sharpness.clamp(0.0, 1.0),
            _padding: 0.0,
        }
    }

    /// The block as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_params_layout() {
        let params = UpscaleParams::new((640, 360), (1280, 720), 1.5);
        assert_eq!(params.as_bytes().len(), 32);
        assert_relative_eq!(params.texel_size[0], 1.0 / 640.0);
        assert_relative_eq!(params.sharpness, 1.0);

        let back: UpscaleParams = *bytemuck::from_bytes(params.as_bytes());
        assert_eq!(back, params);
    }
}
