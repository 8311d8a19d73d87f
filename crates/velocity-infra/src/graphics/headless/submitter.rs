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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use velocity_core::renderer::{
    CommandSubmitter, DrawDescriptor, DrawRange, PrimitiveMode, ProgramId, TextureId,
    VertexLayoutId,
};

/// One call received by a [`RecordingSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedCommand {
    /// `bind_program`.
    BindProgram(ProgramId),
    /// `bind_vertex_layout`.
    BindVertexLayout(VertexLayoutId),
    /// `bind_texture`.
    BindTexture {
        /// Texture unit.
        unit: u32,
        /// Bound texture.
        texture: TextureId,
    },
    /// `draw`.
    Draw(DrawDescriptor),
    /// `multi_draw`.
    MultiDraw {
        /// Shared primitive mode.
        mode: PrimitiveMode,
        /// Submitted ranges.
        ranges: Vec<DrawRange>,
    },
}

impl SubmittedCommand {
    /// Whether the call reached the driver as a draw submission.
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw(_) | Self::MultiDraw { .. })
    }
}

/// Shared view of everything a [`RecordingSubmitter`] has received.
#[derive(Debug, Clone, Default)]
pub struct SubmissionLog {
    commands: Arc<Mutex<Vec<SubmittedCommand>>>,
}

impl SubmissionLog {
    fn lock(&self) -> MutexGuard<'_, Vec<SubmittedCommand>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, command: SubmittedCommand) {
        self.lock().push(command);
    }

    /// A copy of every recorded call, in order.
    pub fn commands(&self) -> Vec<SubmittedCommand> {
        self.lock().clone()
    }

    /// Removes and returns every recorded call.
    pub fn take(&self) -> Vec<SubmittedCommand> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of draw submissions (plain or merged).
    pub fn draw_submissions(&self) -> usize {
        self.lock().iter().filter(|c| c.is_draw()).count()
    }

    /// Number of individual ranges drawn, counting each merged range.
    pub fn drawn_ranges(&self) -> usize {
        self.lock()
            .iter()
            .map(|c| match c {
                SubmittedCommand::Draw(_) => 1,
                SubmittedCommand::MultiDraw { ranges, .. } => ranges.len(),
                _ => 0,
            })
            .sum()
    }
}

/// A command submitter that records calls instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    log: SubmissionLog,
}

impl RecordingSubmitter {
    /// Creates a submitter with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the log that stays valid after the submitter is moved.
    pub fn log(&self) -> SubmissionLog {
        self.log.clone()
    }
}

impl CommandSubmitter for RecordingSubmitter {
    fn bind_program(&mut self, program: ProgramId) {
        self.log.push(SubmittedCommand::BindProgram(program));
    }

    fn bind_vertex_layout(&mut self, layout: VertexLayoutId) {
        self.log.push(SubmittedCommand::BindVertexLayout(layout));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.log.push(SubmittedCommand::BindTexture { unit, texture });
    }

    fn draw(&mut self, draw: &DrawDescriptor) {
        self.log.push(SubmittedCommand::Draw(*draw));
    }

    fn multi_draw(&mut self, mode: PrimitiveMode, ranges: &[DrawRange]) {
        self.log.push(SubmittedCommand::MultiDraw {
            mode,
            ranges: ranges.to_vec(),
        });
    }
}
