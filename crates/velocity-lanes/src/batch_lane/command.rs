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

use super::key::BatchKey;
use velocity_core::renderer::{DrawDescriptor, DrawRange, IndexType, PrimitiveMode};

/// The shape of a buffered draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawKind {
    /// Non-indexed vertices.
    Arrays,
    /// Indexed vertices.
    Elements,
    /// Non-indexed, instanced.
    ArraysInstanced,
    /// Indexed, instanced.
    ElementsInstanced,
}

impl DrawKind {
    /// Whether the draw reads an index buffer.
    pub fn is_indexed(self) -> bool {
        matches!(self, DrawKind::Elements | DrawKind::ElementsInstanced)
    }

    /// Whether the draw carries an instance count.
    pub fn is_instanced(self) -> bool {
        matches!(self, DrawKind::ArraysInstanced | DrawKind::ElementsInstanced)
    }
}

/// One buffered draw. Lives until the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    /// The state this draw needs bound. Its mode is the draw's mode.
    pub key: BatchKey,
    /// Vertex or index range.
    pub range: DrawRange,
    /// Instance count, for instanced kinds.
    pub instances: Option<u32>,
    /// Whether the draw may be merged with its neighbours.
    pub can_batch: bool,
}

impl DrawCommand {
    /// `count` vertices from `first`.
    pub fn arrays(key: BatchKey, mode: PrimitiveMode, first: u32, count: u32) -> Self {
        Self {
            key: key.with_mode(mode),
            range: DrawRange::Arrays { first, count },
            instances: None,
            can_batch: true,
        }
    }

    /// `count` indices of `index_type` starting `byte_offset` bytes into
    /// the bound index buffer.
    pub fn elements(
        key: BatchKey,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        byte_offset: u64,
    ) -> Self {
        Self {
            key: key.with_mode(mode),
            range: DrawRange::Indexed {
                count,
                index_type,
                byte_offset,
            },
            instances: None,
            can_batch: true,
        }
    }

    /// Instanced variant of [`DrawCommand::arrays`]. Never merged.
    pub fn arrays_instanced(
        key: BatchKey,
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        instances: u32,
    ) -> Self {
        Self {
            instances: Some(instances),
            can_batch: false,
            ..Self::arrays(key, mode, first, count)
        }
    }

    /// Instanced variant of [`DrawCommand::elements`]. Never merged.
    pub fn elements_instanced(
        key: BatchKey,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        byte_offset: u64,
        instances: u32,
    ) -> Self {
        Self {
            instances: Some(instances),
            can_batch: false,
            ..Self::elements(key, mode, count, index_type, byte_offset)
        }
    }

    /// The command's kind, derived from its range and instance count.
    pub fn kind(&self) -> DrawKind {
        match (self.range, self.instances) {
            (DrawRange::Arrays { .. }, None) => DrawKind::Arrays,
            (DrawRange::Indexed { .. }, None) => DrawKind::Elements,
            (DrawRange::Arrays { .. }, Some(_)) => DrawKind::ArraysInstanced,
            (DrawRange::Indexed { .. }, Some(_)) => DrawKind::ElementsInstanced,
        }
    }

    /// The primitive mode.
    pub fn mode(&self) -> PrimitiveMode {
        self.key.mode
    }

    /// The descriptor for submitting this command on its own.
    pub fn descriptor(&self) -> DrawDescriptor {
        DrawDescriptor {
            mode: self.key.mode,
            range: self.range,
            instances: self.instances,
        }
    }

    /// Whether `other` can share a run with this command.
    ///
    /// Indexed ranges in one multi-draw must share an index width, so the
    /// index type is part of the comparison.
    pub fn same_run(&self, other: &DrawCommand) -> bool {
        self.key == other.key
            && self.kind() == other.kind()
            && self.range.index_type() == other.range.index_type()
    }

    pub(crate) fn sort_key(&self) -> (u64, BatchKey, DrawKind, Option<IndexType>) {
        (
            self.key.fingerprint(),
            self.key,
            self.kind(),
            self.range.index_type(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velocity_core::renderer::{ProgramId, VertexLayoutId};

    fn key() -> BatchKey {
        BatchKey::new(ProgramId(1), VertexLayoutId(1))
    }

    #[test]
    fn test_constructor_overrides_key_mode() {
        let cmd = DrawCommand::arrays(key(), PrimitiveMode::LineStrip, 0, 4);
        assert_eq!(cmd.mode(), PrimitiveMode::LineStrip);
        assert_eq!(cmd.descriptor().mode, PrimitiveMode::LineStrip);
    }

    #[test]
    fn test_kinds() {
        let k = key();
        let t = PrimitiveMode::Triangles;
        assert_eq!(DrawCommand::arrays(k, t, 0, 3).kind(), DrawKind::Arrays);
        assert_eq!(
            DrawCommand::elements(k, t, 6, IndexType::U16, 0).kind(),
            DrawKind::Elements
        );
        let instanced = DrawCommand::arrays_instanced(k, t, 0, 3, 10);
        assert_eq!(instanced.kind(), DrawKind::ArraysInstanced);
        assert!(!instanced.can_batch);
        assert_eq!(instanced.descriptor().instances, Some(10));
        let instanced = DrawCommand::elements_instanced(k, t, 6, IndexType::U32, 0, 2);
        assert_eq!(instanced.kind(), DrawKind::ElementsInstanced);
        assert!(instanced.kind().is_indexed());
        assert!(!instanced.can_batch);
    }

    #[test]
    fn test_index_width_splits_runs() {
        let t = PrimitiveMode::Triangles;
        let short = DrawCommand::elements(key(), t, 6, IndexType::U16, 0);
        let wide = DrawCommand::elements(key(), t, 6, IndexType::U32, 0);
        assert!(short.same_run(&DrawCommand::elements(key(), t, 3, IndexType::U16, 12)));
        assert!(!short.same_run(&wide));
    }
}
