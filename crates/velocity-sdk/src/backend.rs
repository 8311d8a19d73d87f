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

use std::sync::Arc;
use velocity_core::renderer::{
    BufferDevice, CommandSubmitter, FenceSync, ProgramBinaryDevice, RenderTargetProvider,
};
use velocity_core::GpuCapabilities;
use velocity_infra::{
    HeadlessDevice, HeadlessTargets, RecordingSubmitter, SubmissionLog, TargetLog,
};

/// The driver objects a [`crate::VelocityContext`] runs on.
///
/// Buffer, fence and program services may be shared with loading threads;
/// the submitter and the render target provider belong to the render thread.
#[derive(Debug)]
pub struct Backend {
    /// Buffer creation, mapping and upload.
    pub buffers: Arc<dyn BufferDevice>,
    /// GPU fences.
    pub fences: Arc<dyn FenceSync>,
    /// Program binary export and import.
    pub programs: Arc<dyn ProgramBinaryDevice>,
    /// Draw submission.
    pub submitter: Box<dyn CommandSubmitter>,
    /// Offscreen targets and the upscale pass.
    pub targets: Box<dyn RenderTargetProvider>,
    /// What the driver supports.
    pub capabilities: GpuCapabilities,
}

/// Inspection handles onto a headless backend.
#[derive(Debug, Clone)]
pub struct HeadlessHandles {
    /// The CPU-memory device behind buffers, fences and programs.
    pub device: Arc<HeadlessDevice>,
    /// Every command the submitter received.
    pub submissions: SubmissionLog,
    /// Render target state.
    pub targets: TargetLog,
}

impl Backend {
    /// A backend that runs entirely in CPU memory.
    pub fn headless() -> (Self, HeadlessHandles) {
        Self::headless_with(HeadlessDevice::full_capabilities())
    }

    /// A headless backend reporting `capabilities`.
    pub fn headless_with(capabilities: GpuCapabilities) -> (Self, HeadlessHandles) {
        let device = Arc::new(HeadlessDevice::new(capabilities.clone()));
        let submitter = RecordingSubmitter::new();
        let targets = HeadlessTargets::new(capabilities.max_texture_size);
        let handles = HeadlessHandles {
            device: Arc::clone(&device),
            submissions: submitter.log(),
            targets: targets.log(),
        };
        let backend = Self {
            buffers: device.clone(),
            fences: device.clone(),
            programs: device,
            submitter: Box::new(submitter),
            targets: Box::new(targets),
            capabilities,
        };
        (backend, handles)
    }
}
