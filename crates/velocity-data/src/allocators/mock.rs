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

//! In-memory stand-ins for the driver traits used by the allocator tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use velocity_core::renderer::{
    BufferDescriptor, BufferDevice, BufferId, FenceId, FenceStatus, FenceSync, MappedMemory,
    ResourceError,
};

#[derive(Debug, Default)]
pub(crate) struct MockMemory {
    bytes: Mutex<Vec<u8>>,
}

impl MockMemory {
    fn with_len(len: u64) -> Self {
        Self {
            bytes: Mutex::new(vec![0; len as usize]),
        }
    }
}

impl MappedMemory for MockMemory {
    fn len(&self) -> u64 {
        self.bytes.lock().unwrap().len() as u64
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut bytes = self.bytes.lock().unwrap();
        let start = offset as usize;
        let dst = bytes
            .get_mut(start..start + data.len())
            .ok_or(ResourceError::OutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let bytes = self.bytes.lock().unwrap();
        let start = offset as usize;
        let src = bytes
            .get(start..start + out.len())
            .ok_or(ResourceError::OutOfBounds)?;
        out.copy_from_slice(src);
        Ok(())
    }
}

#[derive(Debug)]
struct RangeView {
    memory: Arc<MockMemory>,
    base: u64,
    len: u64,
}

impl MappedMemory for RangeView {
    fn len(&self) -> u64 {
        self.len
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        if offset + data.len() as u64 > self.len {
            return Err(ResourceError::OutOfBounds);
        }
        self.memory.write(self.base + offset, data)
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        if offset + out.len() as u64 > self.len {
            return Err(ResourceError::OutOfBounds);
        }
        self.memory.read(self.base + offset, out)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockBufferDevice {
    next_id: AtomicU32,
    buffers: Mutex<HashMap<u32, Arc<MockMemory>>>,
    pub refuse_persistent: bool,
    pub explicit_writes: AtomicUsize,
    pub transient_maps: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl MockBufferDevice {
    pub fn refusing_persistent() -> Self {
        Self {
            refuse_persistent: true,
            ..Default::default()
        }
    }

    pub fn contents(&self, id: BufferId, offset: u64, len: usize) -> Vec<u8> {
        let memory = self.buffers.lock().unwrap()[&id.0].clone();
        let mut out = vec![0; len];
        memory.read(offset, &mut out).unwrap();
        out
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    fn memory(&self, id: BufferId) -> Result<Arc<MockMemory>, ResourceError> {
        self.buffers
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .ok_or(ResourceError::InvalidHandle)
    }
}

impl BufferDevice for MockBufferDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.buffers
            .lock()
            .unwrap()
            .insert(id, Arc::new(MockMemory::with_len(descriptor.size)));
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.buffers
            .lock()
            .unwrap()
            .remove(&id.0)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn map_persistent(&self, id: BufferId) -> Result<Arc<dyn MappedMemory>, ResourceError> {
        if self.refuse_persistent {
            return Err(ResourceError::Unsupported("persistent mapping".into()));
        }
        Ok(self.memory(id)?)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        self.explicit_writes.fetch_add(1, Ordering::Relaxed);
        self.memory(id)?.write(offset, data)
    }

    fn map_range(
        &self,
        id: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<Arc<dyn MappedMemory>, ResourceError> {
        self.transient_maps.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(RangeView {
            memory: self.memory(id)?,
            base: offset,
            len: size,
        }))
    }

    fn unmap(&self, id: BufferId) -> Result<(), ResourceError> {
        self.memory(id).map(|_| ())
    }

    fn flush_mapped_range(
        &self,
        id: BufferId,
        _offset: u64,
        _size: u64,
    ) -> Result<(), ResourceError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.memory(id).map(|_| ())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockFences {
    next: AtomicU64,
    live: Mutex<HashSet<u64>>,
    pub stalled: AtomicBool,
    pub waits: AtomicUsize,
    pub timeouts: AtomicUsize,
}

impl MockFences {
    pub fn live_fences(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl FenceSync for MockFences {
    fn insert_fence(&self) -> Result<FenceId, ResourceError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.lock().unwrap().insert(id);
        Ok(FenceId(id))
    }

    fn client_wait(&self, fence: FenceId, _timeout: Duration) -> FenceStatus {
        self.waits.fetch_add(1, Ordering::Relaxed);
        if !self.live.lock().unwrap().contains(&fence.0) {
            FenceStatus::Failed
        } else if self.stalled.load(Ordering::Relaxed) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            FenceStatus::TimedOut
        } else {
            FenceStatus::Signaled
        }
    }

    fn delete_fence(&self, fence: FenceId) {
        self.live.lock().unwrap().remove(&fence.0);
    }
}
