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

//! Velocity: GPU resource and frame optimization for GLES-class renderers.
//!
//! The caller owns a [`VelocityContext`], built from a configuration and a
//! [`Backend`] bundle of driver trait objects, and brackets each frame with
//! [`VelocityContext::begin_frame`] and [`VelocityContext::end_frame`].

#![warn(missing_docs)]

mod backend;
mod context;

pub use backend::{Backend, HeadlessHandles};
pub use context::{FrameInfo, FrameReport, VelocityContext, VelocityStats};

/// Types most applications need.
pub mod prelude {
    pub use crate::{Backend, FrameInfo, FrameReport, VelocityContext, VelocityStats};
    pub use velocity_core::renderer::{
        BufferTarget, BufferUsage, IndexType, PrimitiveMode, ProgramId, TextureId, VertexLayoutId,
    };
    pub use velocity_core::{QualityPreset, VelocityConfig};
    pub use velocity_data::{BufferAllocation, PoolId};
    pub use velocity_lanes::{BatchKey, DrawCommand, VertexElement, VertexFormat};
}
