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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use velocity_core::hash::hash_str;
use velocity_core::renderer::{
    BufferDescriptor, BufferDevice, BufferId, FenceId, FenceStatus, FenceSync, MappedMemory,
    ProgramBinary, ProgramBinaryDevice, ProgramId, ResourceError,
};
use velocity_core::GpuCapabilities;

/// Binary format tag of programs produced by [`HeadlessDevice`].
pub const HEADLESS_BINARY_FORMAT: u32 = 0x4845_4144;

// driver tag + vertex hash + fragment hash
const BINARY_PREFIX_LEN: usize = 24;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffer storage, shared between the device and any mapping of it.
#[derive(Debug)]
struct HeadlessMemory {
    bytes: Mutex<Vec<u8>>,
}

impl MappedMemory for HeadlessMemory {
    fn len(&self) -> u64 {
        lock(&self.bytes).len() as u64
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut bytes = lock(&self.bytes);
        let start = usize::try_from(offset).map_err(|_| ResourceError::OutOfBounds)?;
        let dst = start
            .checked_add(data.len())
            .and_then(|end| bytes.get_mut(start..end))
            .ok_or(ResourceError::OutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let bytes = lock(&self.bytes);
        let start = usize::try_from(offset).map_err(|_| ResourceError::OutOfBounds)?;
        let src = start
            .checked_add(out.len())
            .and_then(|end| bytes.get(start..end))
            .ok_or(ResourceError::OutOfBounds)?;
        out.copy_from_slice(src);
        Ok(())
    }
}

/// A window onto part of a buffer, as returned by `map_range`.
#[derive(Debug)]
struct RangeMapping {
    memory: Arc<HeadlessMemory>,
    base: u64,
    len: u64,
}

impl RangeMapping {
    fn check(&self, offset: u64, len: usize) -> Result<u64, ResourceError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(self.base + offset),
            _ => Err(ResourceError::OutOfBounds),
        }
    }
}

impl MappedMemory for RangeMapping {
    fn len(&self) -> u64 {
        self.len
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let absolute = self.check(offset, data.len())?;
        self.memory.write(absolute, data)
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let absolute = self.check(offset, out.len())?;
        self.memory.read(absolute, out)
    }
}

#[derive(Debug)]
struct HeadlessBufferEntry {
    memory: Arc<HeadlessMemory>,
    size: u64,
    persistent: bool,
    mapped_range: Option<(u64, u64)>,
}

/// An in-memory device implementing buffers, fences and program binaries.
///
/// Programs are "linked" with [`HeadlessDevice::link_program`]; their
/// binaries embed a tag derived from the driver version so that changing the
/// version with [`HeadlessDevice::set_driver_version`] invalidates every
/// binary produced before, the way a driver update does.
#[derive(Debug)]
pub struct HeadlessDevice {
    caps: Mutex<GpuCapabilities>,
    buffers: Mutex<HashMap<BufferId, HeadlessBufferEntry>>,
    programs: Mutex<HashMap<ProgramId, ProgramBinary>>,
    fences: Mutex<HashSet<FenceId>>,
    gpu_stalled: AtomicBool,
    next_buffer_id: AtomicU32,
    next_program_id: AtomicU32,
    next_fence_id: AtomicU64,
    allocated_bytes: AtomicU64,
    source_links: AtomicU64,
    explicit_writes: AtomicU64,
}

impl HeadlessDevice {
    /// Creates a device reporting `caps`.
    pub fn new(caps: GpuCapabilities) -> Self {
        log::info!(
            "HeadlessDevice: renderer '{}', version '{}', persistent mapping: {}, program binary: {}",
            caps.renderer,
            caps.version,
            caps.persistent_mapping,
            caps.program_binary
        );
        Self {
            caps: Mutex::new(caps),
            buffers: Mutex::new(HashMap::new()),
            programs: Mutex::new(HashMap::new()),
            fences: Mutex::new(HashSet::new()),
            gpu_stalled: AtomicBool::new(false),
            next_buffer_id: AtomicU32::new(1),
            next_program_id: AtomicU32::new(1),
            next_fence_id: AtomicU64::new(1),
            allocated_bytes: AtomicU64::new(0),
            source_links: AtomicU64::new(0),
            explicit_writes: AtomicU64::new(0),
        }
    }

    /// Capabilities of a device that supports everything.
    pub fn full_capabilities() -> GpuCapabilities {
        GpuCapabilities {
            renderer: "Velocity Headless".to_string(),
            version: "OpenGL ES 3.2 headless 1.0".to_string(),
            persistent_mapping: true,
            program_binary: true,
            ..Default::default()
        }
    }

    /// The capabilities currently reported.
    pub fn capabilities(&self) -> GpuCapabilities {
        lock(&self.caps).clone()
    }

    /// Simulates a driver update. Binaries produced earlier stop linking.
    pub fn set_driver_version(&self, version: &str) {
        lock(&self.caps).version = version.to_string();
    }

    /// When stalled, every fence wait times out.
    pub fn set_gpu_stalled(&self, stalled: bool) {
        self.gpu_stalled.store(stalled, Ordering::Relaxed);
    }

    fn driver_tag(&self) -> u64 {
        hash_str(&lock(&self.caps).version)
    }

    /// Compiles and links a program from source.
    pub fn link_program(&self, vertex_source: &str, fragment_source: &str) -> ProgramId {
        self.source_links.fetch_add(1, Ordering::Relaxed);

        let mut data = Vec::with_capacity(
            BINARY_PREFIX_LEN + vertex_source.len() + fragment_source.len(),
        );
        data.extend_from_slice(&self.driver_tag().to_le_bytes());
        data.extend_from_slice(&hash_str(vertex_source).to_le_bytes());
        data.extend_from_slice(&hash_str(fragment_source).to_le_bytes());
        data.extend_from_slice(vertex_source.as_bytes());
        data.extend_from_slice(fragment_source.as_bytes());

        let id = ProgramId(self.next_program_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.programs).insert(
            id,
            ProgramBinary {
                format: HEADLESS_BINARY_FORMAT,
                data,
            },
        );
        id
    }

    /// How many programs were linked from source.
    pub fn source_link_count(&self) -> u64 {
        self.source_links.load(Ordering::Relaxed)
    }

    /// Live programs, however they were created.
    pub fn program_count(&self) -> usize {
        lock(&self.programs).len()
    }

    /// Live buffers.
    pub fn buffer_count(&self) -> usize {
        lock(&self.buffers).len()
    }

    /// Bytes held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Uploads that went through `write_buffer` rather than a mapping.
    pub fn explicit_write_count(&self) -> u64 {
        self.explicit_writes.load(Ordering::Relaxed)
    }

    /// Live fences.
    pub fn fence_count(&self) -> usize {
        lock(&self.fences).len()
    }

    /// Reads back buffer contents.
    pub fn read_buffer(
        &self,
        id: BufferId,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, ResourceError> {
        let memory = self.memory(id)?;
        let mut out = vec![0; len];
        memory.read(offset, &mut out)?;
        Ok(out)
    }

    fn memory(&self, id: BufferId) -> Result<Arc<HeadlessMemory>, ResourceError> {
        lock(&self.buffers)
            .get(&id)
            .map(|entry| Arc::clone(&entry.memory))
            .ok_or(ResourceError::InvalidHandle)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(Self::full_capabilities())
    }
}

impl BufferDevice for HeadlessDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let max = lock(&self.caps).max_buffer_size;
        if descriptor.size == 0 || descriptor.size > max {
            return Err(ResourceError::OutOfMemory);
        }
        let len = usize::try_from(descriptor.size).map_err(|_| ResourceError::OutOfMemory)?;

        let id = BufferId(self.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.buffers).insert(
            id,
            HeadlessBufferEntry {
                memory: Arc::new(HeadlessMemory {
                    bytes: Mutex::new(vec![0; len]),
                }),
                size: descriptor.size,
                persistent: descriptor.persistent,
                mapped_range: None,
            },
        );
        self.allocated_bytes
            .fetch_add(descriptor.size, Ordering::Relaxed);

        log::debug!(
            "HeadlessDevice: Created buffer '{}' with ID: {:?}, size: {} bytes",
            descriptor.label.as_deref().unwrap_or("unlabeled"),
            id,
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let entry = lock(&self.buffers)
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        self.allocated_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        Ok(())
    }

    fn map_persistent(&self, id: BufferId) -> Result<Arc<dyn MappedMemory>, ResourceError> {
        if !lock(&self.caps).persistent_mapping {
            return Err(ResourceError::Unsupported("persistent mapping".into()));
        }
        let buffers = lock(&self.buffers);
        let entry = buffers.get(&id).ok_or(ResourceError::InvalidHandle)?;
        if !entry.persistent {
            return Err(ResourceError::Unsupported(
                "buffer was not created with persistent storage".into(),
            ));
        }
        Ok(entry.memory.clone())
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
        let mut buffers = lock(&self.buffers);
        let entry = buffers.get_mut(&id).ok_or(ResourceError::InvalidHandle)?;
        if offset.checked_add(size).map_or(true, |end| end > entry.size) {
            return Err(ResourceError::OutOfBounds);
        }
        entry.mapped_range = Some((offset, size));
        Ok(Arc::new(RangeMapping {
            memory: Arc::clone(&entry.memory),
            base: offset,
            len: size,
        }))
    }

    fn unmap(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut buffers = lock(&self.buffers);
        let entry = buffers.get_mut(&id).ok_or(ResourceError::InvalidHandle)?;
        entry.mapped_range = None;
        Ok(())
    }

    fn flush_mapped_range(
        &self,
        id: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let buffers = lock(&self.buffers);
        let entry = buffers.get(&id).ok_or(ResourceError::InvalidHandle)?;
        if offset.checked_add(size).map_or(true, |end| end > entry.size) {
            return Err(ResourceError::OutOfBounds);
        }
        Ok(())
    }
}

impl FenceSync for HeadlessDevice {
    fn insert_fence(&self) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.next_fence_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.fences).insert(id);
        Ok(id)
    }

    fn client_wait(&self, fence: FenceId, timeout: Duration) -> FenceStatus {
        if !lock(&self.fences).contains(&fence) {
            return FenceStatus::Failed;
        }
        if self.gpu_stalled.load(Ordering::Relaxed) {
            log::trace!("HeadlessDevice: fence {:?} stalled past {:?}", fence, timeout);
            return FenceStatus::TimedOut;
        }
        FenceStatus::Signaled
    }

    fn delete_fence(&self, fence: FenceId) {
        lock(&self.fences).remove(&fence);
    }
}

impl ProgramBinaryDevice for HeadlessDevice {
    fn get_program_binary(&self, program: ProgramId) -> Result<ProgramBinary, ResourceError> {
        if !lock(&self.caps).program_binary {
            return Err(ResourceError::Unsupported("program binaries".into()));
        }
        lock(&self.programs)
            .get(&program)
            .cloned()
            .ok_or(ResourceError::InvalidHandle)
    }

    fn program_from_binary(&self, binary: &ProgramBinary) -> Result<ProgramId, ResourceError> {
        if binary.format != HEADLESS_BINARY_FORMAT {
            return Err(ResourceError::LinkFailed(format!(
                "unknown binary format 0x{:08x}",
                binary.format
            )));
        }
        let tag = binary
            .data
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or_else(|| ResourceError::LinkFailed("truncated binary".into()))?;
        if binary.data.len() < BINARY_PREFIX_LEN || tag != self.driver_tag() {
            return Err(ResourceError::LinkFailed(
                "binary was produced by a different driver".into(),
            ));
        }

        let id = ProgramId(self.next_program_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.programs).insert(id, binary.clone());
        Ok(id)
    }
}
