use std::sync::Arc;

use crate::hal::{self, DescriptorHeapDesc, DescriptorHeapType};

use super::error::{DescriptorResult, hal};
use super::DescriptorHandle;

/// Fixed-capacity, shader-visible descriptor heap.
///
/// Allocation is a bump of the next free handle. Running out of space is a sizing
/// bug: [`alloc`](Self::alloc) panics, [`try_alloc`](Self::try_alloc) lets the caller check.
#[derive(Debug)]
pub struct DescriptorHeap {
    raw: Arc<dyn hal::DescriptorHeap>,
    desc: DescriptorHeapDesc,
    descriptor_size: u32,
    num_free_descriptors: u32,
    first_handle: DescriptorHandle,
    next_free_handle: DescriptorHandle,
}

impl DescriptorHeap {
    pub fn new(
        device: &dyn hal::Device,
        name: &str,
        ty: DescriptorHeapType,
        max_count: u32,
    ) -> DescriptorResult<Self> {
        let desc = DescriptorHeapDesc {
            ty,
            num_descriptors: max_count,
            shader_visible: true,
        };
        let raw = device
            .create_descriptor_heap(&desc)
            .map_err(hal("create shader-visible descriptor heap"))?;
        raw.set_name(name);

        let first_handle = DescriptorHandle::new(raw.cpu_start(), raw.gpu_start());
        Ok(Self {
            descriptor_size: device.descriptor_handle_increment_size(ty),
            num_free_descriptors: max_count,
            first_handle,
            next_free_handle: first_handle,
            raw,
            desc,
        })
    }

    pub fn has_available_space(&self, count: u32) -> bool {
        count <= self.num_free_descriptors
    }

    /// Reserves `count` contiguous descriptors.
    ///
    /// # Panics
    /// When the heap does not have `count` free descriptors.
    pub fn alloc(&mut self, count: u32) -> DescriptorHandle {
        match self.try_alloc(count) {
            Some(handle) => handle,
            None => {
                log::error!(
                    "descriptor heap out of space ({count} requested, {} free); increase heap size",
                    self.num_free_descriptors
                );
                panic!("descriptor heap out of space");
            }
        }
    }

    pub fn try_alloc(&mut self, count: u32) -> Option<DescriptorHandle> {
        if !self.has_available_space(count) {
            return None;
        }
        let handle = self.next_free_handle;
        self.next_free_handle += self.byte_offset(count);
        self.num_free_descriptors -= count;
        Some(handle)
    }

    /// Handle of the descriptor at `index`, counted from the start of the heap.
    pub fn handle_at(&self, index: u32) -> DescriptorHandle {
        self.first_handle + self.byte_offset(index)
    }

    /// Index of `handle` within the heap.
    pub fn offset_of_handle(&self, handle: &DescriptorHandle) -> u32 {
        let cpu = handle.cpu_ptr().unwrap_or_default();
        let first = self.first_handle.cpu_ptr().unwrap_or_default();
        (cpu.wrapping_sub(first) / self.descriptor_size as usize) as u32
    }

    /// True when `handle` lies inside this heap with matching CPU and GPU offsets.
    pub fn validate_handle(&self, handle: &DescriptorHandle) -> bool {
        let (Some(cpu), Some(first_cpu)) = (handle.cpu_ptr(), self.first_handle.cpu_ptr()) else {
            return false;
        };
        let size = self.desc.num_descriptors as usize * self.descriptor_size as usize;
        if cpu < first_cpu || cpu >= first_cpu + size {
            return false;
        }

        match (handle.gpu_ptr(), self.first_handle.gpu_ptr()) {
            (Some(gpu), Some(first_gpu)) => {
                gpu.wrapping_sub(first_gpu) == (cpu - first_cpu) as u64
            }
            (None, None) => true,
            _ => false,
        }
    }

    pub fn descriptor_size(&self) -> u32 {
        self.descriptor_size
    }

    pub fn capacity(&self) -> u32 {
        self.desc.num_descriptors
    }

    pub fn num_free_descriptors(&self) -> u32 {
        self.num_free_descriptors
    }

    pub fn raw(&self) -> &Arc<dyn hal::DescriptorHeap> {
        &self.raw
    }

    fn byte_offset(&self, count: u32) -> i64 {
        i64::from(count) * i64::from(self.descriptor_size)
    }
}
