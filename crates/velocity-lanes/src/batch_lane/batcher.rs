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

use super::command::{DrawCommand, DrawKind};
use super::key::BatchKey;
use serde::Serialize;
use velocity_core::renderer::{CommandSubmitter, DrawRange, IndexType, PrimitiveMode};
use velocity_core::VelocityConfig;

/// Multiplier from the configured batch size to the command buffer capacity.
pub const COMMAND_BUFFER_FACTOR: usize = 8;

/// Tuning for a [`DrawCallBatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingSettings {
    /// Sort and merge commands. When off, commands execute in submission order.
    pub enabled: bool,
    /// Whether instanced submission is allowed by the application.
    pub instancing: bool,
    /// Sizes the command buffer to `max_batch_size * 8` commands.
    pub max_batch_size: u32,
    /// Shortest run that is merged into one submission.
    pub min_batch_size: u32,
}

impl BatchingSettings {
    /// Reads the batching section of a configuration.
    pub fn from_config(config: &VelocityConfig) -> Self {
        Self {
            enabled: config.enable_draw_batching,
            instancing: config.enable_instancing,
            max_batch_size: config.max_batch_size,
            min_batch_size: config.min_batch_size,
        }
    }

    /// Number of commands buffered before an implicit flush.
    pub fn capacity(&self) -> usize {
        (self.max_batch_size.max(1) as usize) * COMMAND_BUFFER_FACTOR
    }
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            instancing: true,
            max_batch_size: 128,
            min_batch_size: 2,
        }
    }
}

/// Draw call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameBatchStats {
    /// Commands submitted to the batcher.
    pub submitted: u64,
    /// Submissions that reached the driver.
    pub executed: u64,
    /// `submitted - executed`, over flushed commands.
    pub saved: u64,
    /// Runs formed by flushes.
    pub batches: u64,
}

/// A run of commands formed by the most recent flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchedDraw {
    /// The state shared by every command of the run.
    pub key: BatchKey,
    /// The kind shared by every command of the run.
    pub kind: DrawKind,
    /// Index of the first command in the sorted buffer.
    pub start: usize,
    /// Number of commands.
    pub len: usize,
    /// Whether the run reads an index buffer.
    pub indexed: bool,
    /// Whether the run went out as a single multi-draw.
    pub merged: bool,
}

/// Buffers a frame's draws and submits them grouped by state.
///
/// The batcher is owned by the render thread and drives the
/// [`CommandSubmitter`] it was given.
#[derive(Debug)]
pub struct DrawCallBatcher {
    submitter: Box<dyn CommandSubmitter>,
    settings: BatchingSettings,
    commands: Vec<DrawCommand>,
    current_key: BatchKey,
    batches: Vec<BatchedDraw>,
    ranges: Vec<DrawRange>,
    frame: FrameBatchStats,
    total: FrameBatchStats,
}

impl DrawCallBatcher {
    /// Creates a batcher submitting through `submitter`.
    pub fn new(submitter: Box<dyn CommandSubmitter>, settings: BatchingSettings) -> Self {
        log::debug!(
            "DrawCallBatcher: capacity {} commands, merging runs of {}+",
            settings.capacity(),
            settings.min_batch_size
        );
        Self {
            submitter,
            commands: Vec::with_capacity(settings.capacity()),
            settings,
            current_key: BatchKey::default(),
            batches: Vec::new(),
            ranges: Vec::new(),
            frame: FrameBatchStats::default(),
            total: FrameBatchStats::default(),
        }
    }

    /// The active settings.
    pub fn settings(&self) -> &BatchingSettings {
        &self.settings
    }

    /// Discards buffered commands and resets the frame counters.
    pub fn begin_frame(&mut self) {
        if !self.commands.is_empty() {
            log::warn!(
                "DrawCallBatcher: dropping {} commands left over from the previous frame",
                self.commands.len()
            );
        }
        self.commands.clear();
        self.batches.clear();
        self.frame = FrameBatchStats::default();
    }

    /// Flushes and returns the frame's counters.
    pub fn end_frame(&mut self) -> FrameBatchStats {
        self.flush();
        self.frame
    }

    /// Buffers `command`, flushing first if the buffer is full.
    pub fn submit(&mut self, command: DrawCommand) {
        if self.commands.len() >= self.settings.capacity() {
            log::warn!(
                "DrawCallBatcher: command buffer full ({}), flushing early",
                self.commands.len()
            );
            self.flush();
        }
        self.commands.push(command);
        self.frame.submitted += 1;
        self.total.submitted += 1;
    }

    /// Sets the key used by the `draw_*` helpers.
    pub fn set_key(&mut self, key: BatchKey) {
        self.current_key = key;
    }

    /// The key used by the `draw_*` helpers.
    pub fn current_key(&self) -> BatchKey {
        self.current_key
    }

    /// Buffers a non-indexed draw with the current key.
    pub fn draw_arrays(&mut self, mode: PrimitiveMode, first: u32, count: u32) {
        let mut cmd = DrawCommand::arrays(self.current_key, mode, first, count);
        cmd.can_batch = self.settings.enabled;
        self.submit(cmd);
    }

    /// Buffers an indexed draw with the current key.
    pub fn draw_elements(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        byte_offset: u64,
    ) {
        let mut cmd =
            DrawCommand::elements(self.current_key, mode, count, index_type, byte_offset);
        cmd.can_batch = self.settings.enabled;
        self.submit(cmd);
    }

    /// Buffers an instanced non-indexed draw with the current key.
    pub fn draw_arrays_instanced(
        &mut self,
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        instances: u32,
    ) {
        self.submit(DrawCommand::arrays_instanced(
            self.current_key,
            mode,
            first,
            count,
            instances,
        ));
    }

    /// Buffers an instanced indexed draw with the current key.
    pub fn draw_elements_instanced(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        byte_offset: u64,
        instances: u32,
    ) {
        self.submit(DrawCommand::elements_instanced(
            self.current_key,
            mode,
            count,
            index_type,
            byte_offset,
            instances,
        ));
    }

    /// Submits every buffered command.
    ///
    /// With batching enabled the buffer is stable-sorted so equal keys are
    /// adjacent. Each run of commands sharing key and kind binds its state
    /// once; a run of at least `min_batch_size` batchable commands is sent as
    /// one `multi_draw`, any other run as individual draws.
    pub fn flush(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        if self.settings.enabled {
            self.commands.sort_by_cached_key(DrawCommand::sort_key);
        }

        self.batches.clear();
        let min_run = self.settings.min_batch_size as usize;
        let flushed = self.commands.len() as u64;
        let mut executed = 0u64;
        let mut start = 0;

        while start < self.commands.len() {
            let first = self.commands[start];
            let len = self.commands[start..]
                .iter()
                .take_while(|c| c.same_run(&first))
                .count();
            let run = &self.commands[start..start + len];
            // multi_draw carries ranges only, so instanced runs always draw one by one.
            let merged = self.settings.enabled
                && len >= min_run
                && !first.kind().is_instanced()
                && run.iter().all(|c| c.can_batch);

            bind_state(self.submitter.as_mut(), &first.key);
            if merged {
                self.ranges.clear();
                self.ranges.extend(run.iter().map(|c| c.range));
                self.submitter.multi_draw(first.mode(), &self.ranges);
                executed += 1;
            } else {
                for cmd in run {
                    self.submitter.draw(&cmd.descriptor());
                    executed += 1;
                }
            }

            self.batches.push(BatchedDraw {
                key: first.key,
                kind: first.kind(),
                start,
                len,
                indexed: first.kind().is_indexed(),
                merged,
            });
            start += len;
        }

        let runs = self.batches.len() as u64;
        log::trace!(
            "DrawCallBatcher: flushed {} commands in {} runs, {} submissions",
            flushed,
            runs,
            executed
        );
        for stats in [&mut self.frame, &mut self.total] {
            stats.executed += executed;
            stats.batches += runs;
            stats.saved += flushed - executed;
        }
        self.commands.clear();
    }

    /// Turns sorting and merging on or off. Takes effect at the next flush.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    /// Whether sorting and merging are on.
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Records whether the application may use instanced draws.
    pub fn set_instancing(&mut self, enabled: bool) {
        self.settings.instancing = enabled;
    }

    /// Whether instanced draws are allowed.
    pub fn instancing_enabled(&self) -> bool {
        self.settings.instancing
    }

    /// Counters since the last [`DrawCallBatcher::begin_frame`].
    pub fn frame_stats(&self) -> FrameBatchStats {
        self.frame
    }

    /// Counters since creation or the last [`DrawCallBatcher::reset_stats`].
    pub fn total_stats(&self) -> FrameBatchStats {
        self.total
    }

    /// Zeroes both the frame and the running counters.
    pub fn reset_stats(&mut self) {
        self.frame = FrameBatchStats::default();
        self.total = FrameBatchStats::default();
    }

    /// Commands waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    /// Runs formed by the most recent flush.
    pub fn last_batches(&self) -> &[BatchedDraw] {
        &self.batches
    }
}

fn bind_state(submitter: &mut dyn CommandSubmitter, key: &BatchKey) {
    submitter.bind_program(key.program);
    submitter.bind_vertex_layout(key.vertex_layout);
    if let Some(texture) = key.texture0 {
        submitter.bind_texture(0, texture);
    }
    if let Some(texture) = key.texture1 {
        submitter.bind_texture(1, texture);
    }
}
