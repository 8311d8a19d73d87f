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

use crate::renderer::api::{
    DrawDescriptor, DrawRange, PrimitiveMode, ProgramId, TextureId, VertexLayoutId,
};
use std::fmt::Debug;

/// The downstream command stream draws are finally issued to.
///
/// Implementations own the driver context and are driven from the render
/// thread only.
pub trait CommandSubmitter: Send + Debug {
    /// Makes `program` current.
    fn bind_program(&mut self, program: ProgramId);

    /// Makes `layout` current.
    fn bind_vertex_layout(&mut self, layout: VertexLayoutId);

    /// Binds `texture` to texture unit `unit`.
    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    /// Issues one draw.
    fn draw(&mut self, draw: &DrawDescriptor);

    /// Issues several ranges sharing a primitive mode as one submission.
    ///
    /// All ranges are either arrays ranges or indexed ranges of the same
    /// index type.
    fn multi_draw(&mut self, mode: PrimitiveMode, ranges: &[DrawRange]);
}
