use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use velocity_core::renderer::{
    BufferDescriptor, BufferDevice, BufferId, BufferTarget, BufferUsage, FenceId, FenceStatus,
    FenceSync, MappedMemory, ResourceError,
};
use velocity_core::GpuCapabilities;
use velocity_data::{BufferPoolAllocator, BufferPoolSettings};

// The allocator never touches buffer contents on the alloc/free path, so the
// device only hands out ids.
#[derive(Debug, Default)]
struct NullDevice {
    next: AtomicU32,
    sizes: Mutex<HashMap<u32, u64>>,
}

impl BufferDevice for NullDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.sizes.lock().unwrap().insert(id, descriptor.size);
        Ok(BufferId(id))
    }
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.sizes.lock().unwrap().remove(&id.0);
        Ok(())
    }
    fn map_persistent(&self, _id: BufferId) -> Result<Arc<dyn MappedMemory>, ResourceError> {
        Err(ResourceError::Unsupported("null device".into()))
    }
    fn write_buffer(&self, _id: BufferId, _offset: u64, _data: &[u8]) -> Result<(), ResourceError> {
        Ok(())
    }
    fn map_range(
        &self,
        _id: BufferId,
        _offset: u64,
        _size: u64,
    ) -> Result<Arc<dyn MappedMemory>, ResourceError> {
        Err(ResourceError::Unsupported("null device".into()))
    }
    fn unmap(&self, _id: BufferId) -> Result<(), ResourceError> {
        Ok(())
    }
    fn flush_mapped_range(&self, _id: BufferId, _o: u64, _s: u64) -> Result<(), ResourceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NullFences;

impl FenceSync for NullFences {
    fn insert_fence(&self) -> Result<FenceId, ResourceError> {
        Ok(FenceId(0))
    }
    fn client_wait(&self, _fence: FenceId, _timeout: Duration) -> FenceStatus {
        FenceStatus::Signaled
    }
    fn delete_fence(&self, _fence: FenceId) {}
}

fn bench_pool(c: &mut Criterion) {
    let allocator = BufferPoolAllocator::new(
        Arc::new(NullDevice::default()),
        Arc::new(NullFences),
        &GpuCapabilities::default(),
        &BufferPoolSettings {
            stream_buffer_size: 3 * 1024 * 1024,
            ..Default::default()
        },
    )
    .unwrap();
    let pool = allocator
        .create_pool(BufferTarget::Vertex, BufferUsage::Static, 64 * 1024 * 1024)
        .unwrap();

    let mut group = c.benchmark_group("Buffer Pool");

    group.bench_function("alloc/free 256 mixed sizes", |b| {
        b.iter(|| {
            let allocations: Vec<_> = (0..256u64)
                .map(|i| allocator.alloc(pool, 64 + (i * 977) % 16_384).unwrap())
                .collect();
            // Free every other allocation first to exercise coalescing both ways.
            let (even, odd): (Vec<_>, Vec<_>) = allocations
                .into_iter()
                .enumerate()
                .partition(|(i, _)| i % 2 == 0);
            for (_, allocation) in even.into_iter().chain(odd) {
                allocator.free(black_box(allocation)).unwrap();
            }
        });
    });

    group.bench_function("stream frame of 512 allocations", |b| {
        b.iter(|| {
            allocator.stream_begin_frame();
            for i in 0..512u64 {
                black_box(allocator.stream_alloc(64 + i, None));
            }
            allocator.stream_end_frame();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool);
criterion_main!(benches);
