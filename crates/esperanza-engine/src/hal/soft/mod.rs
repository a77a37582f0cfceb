//! Software GPU timeline.
//!
//! Implements the backend traits without a graphics driver. Queues are lanes of
//! pending operations that drain in submission order; fences carry completed
//! values that advance only when a lane actually reaches a signal.
//!
//! `ExecutionMode::Threaded` runs the timeline on a worker thread, like a real GPU.
//! `ExecutionMode::Manual` runs it only when [`SoftDevice::flush`] is called or a
//! CPU wait needs progress, which keeps tests deterministic.

mod command;
mod queue;
mod timeline;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::{
    AddressSpace, Backend, BufferDesc, CommandAllocator, CommandList, CommandListType,
    DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType, Device, DeviceInfo, Fence, HalError,
    HalResult, Queue, Resource, VirtualDescriptorHeap,
};

pub use command::{SoftCommandAllocator, SoftCommandList};
pub use queue::{SoftFence, SoftQueue};

use timeline::Timeline;

/// Generic failure status reported for injected faults.
pub(crate) const E_FAIL: u32 = 0x8000_4005;
const E_INVALIDARG: u32 = 0x8007_0057;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExecutionMode {
    Threaded,
    Manual,
}

/// One-shot failure points for exercising error paths.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Fault {
    CreateQueue(CommandListType),
    CreateFence,
    CreateAllocator,
    ResetAllocator,
    CreateCommandList,
    CreateDescriptorHeap,
    Signal,
}

#[derive(Debug, Default)]
pub(crate) struct FaultInjector {
    armed: Mutex<Vec<Fault>>,
}

impl FaultInjector {
    fn arm(&self, fault: Fault) {
        self.armed.lock().push(fault);
    }

    /// Consumes an armed fault; true when the caller should fail.
    pub(crate) fn take(&self, fault: Fault) -> bool {
        let mut armed = self.armed.lock();
        match armed.iter().position(|f| *f == fault) {
            Some(index) => {
                armed.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Counters describing what the software GPU has executed.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SoftStats {
    pub executed_lists: u64,
    pub executed_commands: u64,
    /// Lists whose allocator was reset before the timeline reached them.
    pub stale_executions: u64,
    pub signals: u64,
    pub waits: u64,
}

pub struct SoftDevice {
    timeline: Arc<Timeline>,
    faults: Arc<FaultInjector>,
    cpu_addresses: AddressSpace,
    gpu_addresses: AddressSpace,
    next_resource_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftDevice {
    pub fn new(mode: ExecutionMode) -> HalResult<Self> {
        let timeline = Arc::new(Timeline::new(mode));

        let worker = match mode {
            ExecutionMode::Threaded => {
                let gpu = Arc::clone(&timeline);
                let handle = std::thread::Builder::new()
                    .name("soft-gpu".to_owned())
                    .spawn(move || gpu.run_worker())
                    .map_err(|e| HalError::Backend(format!("failed to spawn soft gpu: {e}")))?;
                Some(handle)
            }
            ExecutionMode::Manual => None,
        };

        log::debug!("soft device created ({mode:?})");

        Ok(Self {
            timeline,
            faults: Arc::new(FaultInjector::default()),
            cpu_addresses: AddressSpace::new(0x1_0000),
            gpu_addresses: AddressSpace::new(0x1_0000_0000),
            next_resource_id: AtomicU64::new(1),
            worker: Mutex::new(worker),
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.timeline.mode()
    }

    /// Runs all queued work that can make progress. Returns false when nothing ran.
    pub fn flush(&self) -> bool {
        self.timeline.flush()
    }

    pub fn stats(&self) -> SoftStats {
        self.timeline.stats()
    }

    /// Operations submitted but not yet executed, across all queues.
    pub fn pending_ops(&self) -> usize {
        self.timeline.pending_ops()
    }

    /// Arms a one-shot failure for the next matching call.
    pub fn inject_fault(&self, fault: Fault) {
        self.faults.arm(fault);
    }
}

impl std::fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDevice")
            .field("mode", &self.timeline.mode())
            .finish_non_exhaustive()
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        self.timeline.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("soft gpu worker panicked");
            }
        }
    }
}

impl Device for SoftDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("Esperanza software GPU ({:?})", self.timeline.mode()),
            backend: Backend::Soft,
        }
    }

    fn create_command_queue(&self, ty: CommandListType) -> HalResult<Box<dyn Queue>> {
        if self.faults.take(Fault::CreateQueue(ty)) {
            return Err(HalError::Status(E_FAIL));
        }
        Ok(Box::new(SoftQueue::new(
            ty,
            Arc::clone(&self.timeline),
            Arc::clone(&self.faults),
        )))
    }

    fn create_fence(&self, initial_value: u64) -> HalResult<Arc<dyn Fence>> {
        if self.faults.take(Fault::CreateFence) {
            return Err(HalError::Status(E_FAIL));
        }
        Ok(Arc::new(SoftFence::new(initial_value, Arc::clone(&self.timeline))))
    }

    fn create_command_allocator(
        &self,
        ty: CommandListType,
    ) -> HalResult<Arc<dyn CommandAllocator>> {
        if self.faults.take(Fault::CreateAllocator) {
            return Err(HalError::OutOfMemory);
        }
        Ok(Arc::new(SoftCommandAllocator::new(ty, Arc::clone(&self.faults))))
    }

    fn create_command_list(
        &self,
        ty: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> HalResult<Box<dyn CommandList>> {
        if self.faults.take(Fault::CreateCommandList) {
            return Err(HalError::Status(E_FAIL));
        }
        if allocator.ty() != ty {
            return Err(HalError::Status(E_INVALIDARG));
        }
        Ok(Box::new(SoftCommandList::open(ty, allocator)?))
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> HalResult<Arc<dyn DescriptorHeap>> {
        if self.faults.take(Fault::CreateDescriptorHeap) {
            return Err(HalError::OutOfMemory);
        }
        if desc.num_descriptors == 0 || (desc.shader_visible && !desc.ty.can_be_shader_visible()) {
            return Err(HalError::Status(E_INVALIDARG));
        }

        Ok(Arc::new(VirtualDescriptorHeap::new(
            desc,
            self.descriptor_handle_increment_size(desc.ty),
            &self.cpu_addresses,
            &self.gpu_addresses,
        )))
    }

    fn descriptor_handle_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        ty.virtual_increment_size()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> HalResult<Arc<dyn Resource>> {
        if desc.size == 0 {
            return Err(HalError::Status(E_INVALIDARG));
        }
        Ok(Arc::new(SoftBuffer {
            id: self.next_resource_id.fetch_add(1, Ordering::Relaxed),
            size: desc.size,
            gpu_address: self.gpu_addresses.reserve(desc.size),
        }))
    }
}

#[derive(Debug)]
pub struct SoftBuffer {
    id: u64,
    size: u64,
    gpu_address: u64,
}

impl Resource for SoftBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn gpu_virtual_address(&self) -> Option<u64> {
        Some(self.gpu_address)
    }
}
