use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{DescriptorHeap, DescriptorHeapDesc};

const ALIGNMENT: u64 = 256;

/// Hands out non-overlapping, aligned address ranges.
///
/// Backends without real descriptor or virtual addresses use this to give heaps
/// and resources stable, distinct addresses.
#[derive(Debug)]
pub(crate) struct AddressSpace {
    next: AtomicU64,
}

impl AddressSpace {
    pub(crate) fn new(base: u64) -> Self {
        Self {
            next: AtomicU64::new(align_up(base.max(ALIGNMENT))),
        }
    }

    /// Reserves `size` bytes and returns the start of the range.
    pub(crate) fn reserve(&self, size: u64) -> u64 {
        let size = align_up(size.max(1));
        self.next.fetch_add(size, Ordering::Relaxed)
    }
}

/// Descriptor heap that is only an address range.
///
/// Used by backends whose descriptors are not backed by native heap memory.
#[derive(Debug)]
pub(crate) struct VirtualDescriptorHeap {
    desc: DescriptorHeapDesc,
    cpu_start: usize,
    gpu_start: Option<u64>,
    name: Mutex<String>,
}

impl VirtualDescriptorHeap {
    pub(crate) fn new(
        desc: &DescriptorHeapDesc,
        increment_size: u32,
        cpu: &AddressSpace,
        gpu: &AddressSpace,
    ) -> Self {
        let bytes = u64::from(desc.num_descriptors) * u64::from(increment_size);
        Self {
            desc: desc.clone(),
            cpu_start: cpu.reserve(bytes) as usize,
            gpu_start: desc.shader_visible.then(|| gpu.reserve(bytes)),
            name: Mutex::new(String::new()),
        }
    }
}

impl DescriptorHeap for VirtualDescriptorHeap {
    fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }

    fn cpu_start(&self) -> usize {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }
}

fn align_up(value: u64) -> u64 {
    value.div_ceil(ALIGNMENT) * ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_do_not_overlap() {
        let space = AddressSpace::new(0x1000);
        let a = space.reserve(10);
        let b = space.reserve(300);
        let c = space.reserve(1);
        assert_eq!(a, 0x1000);
        assert!(b >= a + 10);
        assert!(c >= b + 300);
        assert_eq!(b % ALIGNMENT, 0);
        assert_eq!(c % ALIGNMENT, 0);
    }

    #[test]
    fn zero_base_is_never_handed_out() {
        let space = AddressSpace::new(0);
        assert_ne!(space.reserve(4), 0);
    }
}
