use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::hal::{self, DescriptorHeapDesc, DescriptorHeapType};

use super::error::{DescriptorError, DescriptorResult, hal};
use super::DescriptorHandle;

/// Descriptors per heap created for a [`DescriptorAllocator`].
pub const NUM_DESCRIPTORS_PER_HEAP: u32 = 256;

/// Owner of every CPU-only descriptor heap handed to descriptor allocators.
///
/// Shared by all allocators of one device. Heaps are never returned one at a time;
/// [`destroy_all`](Self::destroy_all) releases them together at teardown.
#[derive(Debug)]
pub struct DescriptorHeapPool {
    device: Arc<dyn hal::Device>,
    heaps: Mutex<Vec<Arc<dyn hal::DescriptorHeap>>>,
    destroyed: AtomicBool,
}

impl DescriptorHeapPool {
    pub fn new(device: Arc<dyn hal::Device>) -> Self {
        Self {
            device,
            heaps: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &Arc<dyn hal::Device> {
        &self.device
    }

    /// Number of heaps currently owned by the pool.
    pub fn len(&self) -> usize {
        self.heaps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heaps.lock().is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn request_new_heap(&self, ty: DescriptorHeapType) -> DescriptorResult<Arc<dyn hal::DescriptorHeap>> {
        let mut heaps = self.heaps.lock();
        if self.is_destroyed() {
            return Err(DescriptorError::PoolDestroyed.logged());
        }

        let heap = self
            .device
            .create_descriptor_heap(&DescriptorHeapDesc {
                ty,
                num_descriptors: NUM_DESCRIPTORS_PER_HEAP,
                shader_visible: false,
            })
            .map_err(hal("create descriptor heap"))?;
        heap.set_name(&format!("{ty:?} descriptor heap {}", heaps.len()));
        heaps.push(Arc::clone(&heap));

        log::debug!("descriptor heap pool grew to {} heap(s)", heaps.len());
        Ok(heap)
    }

    /// Releases every heap. Allocators fail from here on.
    pub fn destroy_all(&self) {
        let mut heaps = self.heaps.lock();
        self.destroyed.store(true, Ordering::Release);
        log::debug!("releasing {} descriptor heap(s)", heaps.len());
        heaps.clear();
    }
}

/// Unbounded bump allocator for CPU-visible descriptors of one heap type.
///
/// Draws fixed-size heaps from a shared [`DescriptorHeapPool`] whenever the current
/// one cannot fit a request. Nothing is freed individually. Descriptors that must be
/// shader visible are copied into a [`DescriptorHeap`](super::DescriptorHeap).
#[derive(Debug)]
pub struct DescriptorAllocator {
    ty: DescriptorHeapType,
    pool: Arc<DescriptorHeapPool>,
    current_heap: Option<Arc<dyn hal::DescriptorHeap>>,
    current_handle: DescriptorHandle,
    descriptor_size: Option<u32>,
    remaining_free_handles: u32,
}

impl DescriptorAllocator {
    pub fn new(pool: Arc<DescriptorHeapPool>, ty: DescriptorHeapType) -> Self {
        Self {
            ty,
            pool,
            current_heap: None,
            current_handle: DescriptorHandle::NULL,
            descriptor_size: None,
            remaining_free_handles: 0,
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    /// Free slots left in the current heap.
    pub fn remaining(&self) -> u32 {
        self.remaining_free_handles
    }

    /// Reserves `count` contiguous descriptors and returns the first.
    pub fn allocate(&mut self, count: u32) -> DescriptorResult<DescriptorHandle> {
        if count > NUM_DESCRIPTORS_PER_HEAP {
            return Err(DescriptorError::RequestTooLarge {
                ty: self.ty,
                count,
                capacity: NUM_DESCRIPTORS_PER_HEAP,
            }
            .logged());
        }
        if self.pool.is_destroyed() {
            return Err(DescriptorError::PoolDestroyed.logged());
        }

        if self.current_heap.is_none() || self.remaining_free_handles < count {
            let heap = self.pool.request_new_heap(self.ty)?;
            self.current_handle = DescriptorHandle::cpu_only(heap.cpu_start());
            self.remaining_free_handles = NUM_DESCRIPTORS_PER_HEAP;
            self.current_heap = Some(heap);
        }

        let descriptor_size = *self
            .descriptor_size
            .get_or_insert_with(|| self.pool.device().descriptor_handle_increment_size(self.ty));

        let handle = self.current_handle;
        self.current_handle += i64::from(count) * i64::from(descriptor_size);
        self.remaining_free_handles -= count;
        Ok(handle)
    }
}
