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

use crate::config::UpscaleMethod;

/// An opaque handle to an offscreen render target (framebuffer + attachments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u32);

/// A descriptor used to create an offscreen render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetDescriptor {
    /// A debug label.
    pub label: Option<String>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Attach a depth buffer alongside the color texture.
    pub depth: bool,
}

/// A full-screen pass that samples an offscreen target onto the bound target.
#[derive(Debug, Clone, Copy)]
pub struct FullscreenPass<'a> {
    /// The render target whose color attachment is sampled.
    pub source: RenderTargetId,
    /// The resampling filter.
    pub method: UpscaleMethod,
    /// Raw uniform block for the upscale shader.
    pub params: &'a [u8],
}
