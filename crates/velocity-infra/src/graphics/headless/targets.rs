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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use velocity_core::config::UpscaleMethod;
use velocity_core::renderer::{
    FullscreenPass, RenderTargetDescriptor, RenderTargetId, RenderTargetProvider, ResourceError,
};

/// Everything a [`HeadlessTargets`] provider currently holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetState {
    /// Live offscreen targets and their dimensions.
    pub targets: HashMap<RenderTargetId, (u32, u32)>,
    /// Bound target; `None` is the default target.
    pub bound: Option<RenderTargetId>,
    /// Last viewport set.
    pub viewport: (i32, i32, u32, u32),
    /// Depth testing state.
    pub depth_test: bool,
    /// Blending state.
    pub blend: bool,
    /// Targets created over the provider's lifetime.
    pub created: u64,
    /// Full-screen passes drawn.
    pub fullscreen_passes: u64,
    /// Source and filter of the last full-screen pass.
    pub last_pass: Option<(RenderTargetId, UpscaleMethod)>,
    /// Uniform block of the last full-screen pass.
    pub last_params: Vec<u8>,
}

/// Shared view of a [`HeadlessTargets`] provider.
#[derive(Debug, Clone, Default)]
pub struct TargetLog {
    state: Arc<Mutex<TargetState>>,
}

impl TargetLog {
    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> TargetState {
        self.lock().clone()
    }
}

/// A render-target provider that tracks state instead of drawing.
#[derive(Debug)]
pub struct HeadlessTargets {
    log: TargetLog,
    next_id: u32,
    max_dimension: u32,
}

impl HeadlessTargets {
    /// Creates a provider accepting targets up to `max_dimension` pixels wide or high.
    pub fn new(max_dimension: u32) -> Self {
        Self {
            log: TargetLog::default(),
            next_id: 1,
            max_dimension,
        }
    }

    /// A handle onto the provider state that stays valid after it is moved.
    pub fn log(&self) -> TargetLog {
        self.log.clone()
    }
}

impl Default for HeadlessTargets {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl RenderTargetProvider for HeadlessTargets {
    fn create_render_target(
        &mut self,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<RenderTargetId, ResourceError> {
        let (w, h) = (descriptor.width, descriptor.height);
        if w == 0 || h == 0 || w > self.max_dimension || h > self.max_dimension {
            return Err(ResourceError::BackendError(format!(
                "framebuffer {w}x{h} incomplete (limit {})",
                self.max_dimension
            )));
        }
        let id = RenderTargetId(self.next_id);
        self.next_id += 1;

        let mut state = self.log.lock();
        state.targets.insert(id, (w, h));
        state.created += 1;
        log::debug!("HeadlessTargets: Created render target {:?} ({}x{})", id, w, h);
        Ok(id)
    }

    fn destroy_render_target(&mut self, id: RenderTargetId) -> Result<(), ResourceError> {
        let mut state = self.log.lock();
        state
            .targets
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        if state.bound == Some(id) {
            state.bound = None;
        }
        Ok(())
    }

    fn bind_render_target(&mut self, id: Option<RenderTargetId>) {
        self.log.lock().bound = id;
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.log.lock().viewport = (x, y, width, height);
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.log.lock().depth_test = enabled;
    }

    fn set_blend(&mut self, enabled: bool) {
        self.log.lock().blend = enabled;
    }

    fn draw_fullscreen(&mut self, pass: &FullscreenPass<'_>) {
        let mut state = self.log.lock();
        state.fullscreen_passes += 1;
        state.last_pass = Some((pass.source, pass.method));
        state.last_params = pass.params.to_vec();
    }
}
