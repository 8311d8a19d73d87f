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

//! Index-based storage for the block list of a pool.

/// A contiguous region of a pool, linked to its neighbours by arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub offset: u64,
    pub size: u64,
    pub free: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl Block {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Slot storage with vacant-slot recycling.
///
/// Indices stay stable for the lifetime of the block they hold.
#[derive(Debug, Default)]
pub(crate) struct BlockArena {
    slots: Vec<Option<Block>>,
    vacant: Vec<usize>,
}

impl BlockArena {
    pub fn insert(&mut self, block: Block) -> usize {
        match self.vacant.pop() {
            Some(index) => {
                self.slots[index] = Some(block);
                index
            }
            None => {
                self.slots.push(Some(block));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Block> {
        let block = self.slots.get_mut(index)?.take()?;
        self.vacant.push(index);
        Some(block)
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}
