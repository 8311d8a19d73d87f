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

use crate::renderer::api::{FullscreenPass, RenderTargetDescriptor, RenderTargetId};
use crate::renderer::error::ResourceError;
use std::fmt::Debug;

/// Offscreen targets and the final presentation pass.
pub trait RenderTargetProvider: Send + Debug {
    /// Creates an offscreen color (and optionally depth) target.
    /// ## Errors
    /// * `ResourceError` - If the framebuffer is incomplete or memory is exhausted.
    fn create_render_target(
        &mut self,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<RenderTargetId, ResourceError>;

    /// Destroys an offscreen target.
    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<(), ResourceError>;

    /// Binds an offscreen target, or the default target when `None`.
    fn bind_render_target(&mut self, id: Option<RenderTargetId>);

    /// Sets the viewport rectangle.
    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    /// Enables or disables depth testing.
    fn set_depth_test(&mut self, enabled: bool);

    /// Enables or disables blending.
    fn set_blend(&mut self, enabled: bool);

    /// Draws a full-screen triangle sampling `pass.source`.
    fn draw_fullscreen(&mut self, pass: &FullscreenPass<'_>);
}
