//! wgpu-backed device.
//!
//! wgpu exposes a single in-order queue per device, so:
//! - all three queue types submit to the same `wgpu::Queue`
//! - queue-side waits are already satisfied by submission order
//! - fences are values advanced from `Queue::on_submitted_work_done`
//!
//! Descriptor heaps are virtual address ranges; wgpu owns real binding memory.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    AddressSpace, Backend, BufferDesc, Command, CommandAllocator, CommandList, CommandListType,
    DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType, Device, DeviceInfo, EventDepth, Fence,
    HalError, HalResult, Queue, Resource, VirtualDescriptorHeap,
};

/// Adapter and device selection for [`WgpuDevice::new`].
#[derive(Debug, Clone)]
pub struct WgpuInit {
    pub power_preference: ::wgpu::PowerPreference,

    /// Use a software adapter even when hardware is present.
    pub force_fallback_adapter: bool,

    pub label: String,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            power_preference: ::wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            label: "esperanza device".to_owned(),
        }
    }
}

pub struct WgpuDevice {
    device: ::wgpu::Device,
    queue: ::wgpu::Queue,
    adapter_info: ::wgpu::AdapterInfo,
    cpu_addresses: AddressSpace,
    gpu_addresses: AddressSpace,
    next_resource_id: AtomicU64,
}

impl WgpuDevice {
    /// Selects an adapter and opens a device on it.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: &WgpuInit) -> HalResult<Self> {
        let instance = ::wgpu::Instance::new(&::wgpu::InstanceDescriptor {
            backends: ::wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&::wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .map_err(|e| HalError::Backend(format!("no suitable GPU adapter: {e}")))?;

        let (device, queue) = adapter
            .request_device(&::wgpu::DeviceDescriptor {
                label: Some(&init.label),
                required_features: ::wgpu::Features::empty(),
                required_limits: ::wgpu::Limits::default(),
                experimental_features: ::wgpu::ExperimentalFeatures::disabled(),
                memory_hints: ::wgpu::MemoryHints::Performance,
                trace: ::wgpu::Trace::Off,
            })
            .await
            .map_err(|e| HalError::Backend(format!("failed to create wgpu device: {e}")))?;

        let adapter_info = adapter.get_info();
        log::debug!(
            "wgpu adapter {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            cpu_addresses: AddressSpace::new(0x1_0000),
            gpu_addresses: AddressSpace::new(0x1_0000_0000),
            next_resource_id: AtomicU64::new(1),
        })
    }

    pub fn raw_device(&self) -> &::wgpu::Device {
        &self.device
    }

    pub fn raw_queue(&self) -> &::wgpu::Queue {
        &self.queue
    }
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish_non_exhaustive()
    }
}

impl Device for WgpuDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.adapter_info.name.clone(),
            backend: Backend::Wgpu,
        }
    }

    fn create_command_queue(&self, ty: CommandListType) -> HalResult<Box<dyn Queue>> {
        Ok(Box::new(WgpuQueue {
            ty,
            queue: self.queue.clone(),
            name: Mutex::new(String::new()),
        }))
    }

    fn create_fence(&self, initial_value: u64) -> HalResult<Arc<dyn Fence>> {
        Ok(Arc::new(WgpuFence {
            completed: Arc::new(AtomicU64::new(initial_value)),
            device: self.device.clone(),
            name: Mutex::new(String::new()),
        }))
    }

    fn create_command_allocator(
        &self,
        ty: CommandListType,
    ) -> HalResult<Arc<dyn CommandAllocator>> {
        Ok(Arc::new(WgpuCommandAllocator {
            ty,
            usage: Arc::new(AllocatorUsage::default()),
            name: Mutex::new(String::new()),
        }))
    }

    fn create_command_list(
        &self,
        ty: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> HalResult<Box<dyn CommandList>> {
        let usage = usage_of(allocator)?;
        usage.bind()?;

        Ok(Box::new(WgpuCommandList {
            ty,
            device: self.device.clone(),
            encoder: Some(new_encoder(&self.device)),
            finished: None,
            usage,
            depth: EventDepth::default(),
            name: String::new(),
        }))
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
    ) -> HalResult<Arc<dyn DescriptorHeap>> {
        if desc.num_descriptors == 0 {
            return Err(HalError::Backend("descriptor heap must not be empty".into()));
        }
        if desc.shader_visible && !desc.ty.can_be_shader_visible() {
            return Err(HalError::Backend(format!(
                "{:?} heaps cannot be shader visible",
                desc.ty
            )));
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
            return Err(HalError::Backend("buffer size must not be zero".into()));
        }
        let buffer = self.device.create_buffer(&::wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: ::wgpu::BufferUsages::COPY_SRC
                | ::wgpu::BufferUsages::COPY_DST
                | ::wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        Ok(Arc::new(WgpuBuffer {
            id: self.next_resource_id.fetch_add(1, Ordering::Relaxed),
            buffer,
        }))
    }
}

// ── queue ───────────────────────────────────────────────────────────────

pub struct WgpuQueue {
    ty: CommandListType,
    queue: ::wgpu::Queue,
    name: Mutex<String>,
}

impl fmt::Debug for WgpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuQueue")
            .field("ty", &self.ty)
            .field("name", &*self.name.lock())
            .finish()
    }
}

impl Queue for WgpuQueue {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn execute(&self, list: &mut dyn CommandList) -> HalResult<()> {
        let list = list
            .as_any_mut()
            .downcast_mut::<WgpuCommandList>()
            .ok_or(HalError::BackendMismatch)?;
        if !list.is_closed() {
            return Err(HalError::ListNotClosed);
        }
        // A list that was already submitted has nothing left to run.
        if let Some(buffer) = list.finished.take() {
            self.queue.submit(std::iter::once(buffer));
        }
        Ok(())
    }

    fn signal(&self, fence: &dyn Fence, value: u64) -> HalResult<()> {
        let fence = fence
            .as_any()
            .downcast_ref::<WgpuFence>()
            .ok_or(HalError::BackendMismatch)?;
        let completed = Arc::clone(&fence.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }

    fn wait(&self, fence: &dyn Fence, _value: u64) -> HalResult<()> {
        fence
            .as_any()
            .downcast_ref::<WgpuFence>()
            .ok_or(HalError::BackendMismatch)?;
        // Single in-order queue: everything signaled earlier already precedes later work.
        Ok(())
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }
}

// ── fence ───────────────────────────────────────────────────────────────

pub struct WgpuFence {
    completed: Arc<AtomicU64>,
    device: ::wgpu::Device,
    name: Mutex<String>,
}

impl fmt::Debug for WgpuFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuFence")
            .field("completed", &self.completed.load(Ordering::Acquire))
            .field("name", &*self.name.lock())
            .finish()
    }
}

impl Fence for WgpuFence {
    fn completed_value(&self) -> u64 {
        // Completion callbacks only run while the device is polled.
        if let Err(e) = self.device.poll(::wgpu::PollType::Poll) {
            log::warn!("wgpu poll failed: {e}");
        }
        self.completed.load(Ordering::Acquire)
    }

    fn signal(&self, value: u64) -> HalResult<()> {
        self.completed.store(value, Ordering::Release);
        Ok(())
    }

    fn wait(&self, value: u64) -> HalResult<()> {
        if self.completed.load(Ordering::Acquire) >= value {
            return Ok(());
        }

        self.device
            .poll(::wgpu::PollType::wait_indefinitely())
            .map_err(|e| HalError::Backend(format!("wgpu poll failed: {e}")))?;

        let completed = self.completed.load(Ordering::Acquire);
        if completed >= value {
            Ok(())
        } else {
            // Every submission is done, so no pending signal can raise the value.
            Err(HalError::Stalled { value, completed })
        }
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── command allocator / list ────────────────────────────────────────────

#[derive(Debug, Default)]
struct AllocatorUsage {
    open_lists: AtomicUsize,
    reset_count: AtomicU64,
}

impl AllocatorUsage {
    fn bind(&self) -> HalResult<()> {
        self.open_lists
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| HalError::InUse)
    }

    fn unbind(&self) {
        self.open_lists.store(0, Ordering::Release);
    }
}

/// wgpu has no allocator object; this only tracks the recording rules.
#[derive(Debug)]
pub struct WgpuCommandAllocator {
    ty: CommandListType,
    usage: Arc<AllocatorUsage>,
    name: Mutex<String>,
}

impl CommandAllocator for WgpuCommandAllocator {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn reset(&self) -> HalResult<()> {
        if self.usage.open_lists.load(Ordering::Acquire) > 0 {
            return Err(HalError::InUse);
        }
        self.usage.reset_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn reset_count(&self) -> u64 {
        self.usage.reset_count.load(Ordering::Relaxed)
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn usage_of(allocator: &Arc<dyn CommandAllocator>) -> HalResult<Arc<AllocatorUsage>> {
    allocator
        .as_any()
        .downcast_ref::<WgpuCommandAllocator>()
        .map(|a| Arc::clone(&a.usage))
        .ok_or(HalError::BackendMismatch)
}

fn new_encoder(device: &::wgpu::Device) -> ::wgpu::CommandEncoder {
    device.create_command_encoder(&::wgpu::CommandEncoderDescriptor {
        label: Some("esperanza command list"),
    })
}

pub struct WgpuCommandList {
    ty: CommandListType,
    device: ::wgpu::Device,
    /// `Some` while recording.
    encoder: Option<::wgpu::CommandEncoder>,
    /// Closed but not yet submitted.
    finished: Option<::wgpu::CommandBuffer>,
    usage: Arc<AllocatorUsage>,
    depth: EventDepth,
    name: String,
}

impl fmt::Debug for WgpuCommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuCommandList")
            .field("ty", &self.ty)
            .field("recording", &self.encoder.is_some())
            .field("name", &self.name)
            .finish()
    }
}

impl CommandList for WgpuCommandList {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn record(&mut self, command: Command) -> HalResult<()> {
        let encoder = self.encoder.as_mut().ok_or(HalError::ListClosed)?;
        self.depth.apply(&command)?;
        match &command {
            Command::Marker(label) => encoder.insert_debug_marker(label),
            Command::BeginEvent(label) => encoder.push_debug_group(label),
            Command::EndEvent => encoder.pop_debug_group(),
            // wgpu tracks resource usage itself.
            Command::ResourceBarrier { .. } => {}
        }
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if self.encoder.is_none() {
            return Err(HalError::ListClosed);
        }
        self.depth.check_balanced()?;
        if let Some(encoder) = self.encoder.take() {
            self.finished = Some(encoder.finish());
        }
        self.usage.unbind();
        Ok(())
    }

    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> HalResult<()> {
        if self.encoder.is_some() {
            return Err(HalError::ListNotClosed);
        }
        let usage = usage_of(allocator)?;
        usage.bind()?;
        self.usage = usage;
        self.finished = None;
        self.encoder = Some(new_encoder(&self.device));
        self.depth.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.encoder.is_none()
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for WgpuCommandList {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            self.usage.unbind();
        }
    }
}

// ── resources ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct WgpuBuffer {
    id: u64,
    buffer: ::wgpu::Buffer,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &::wgpu::Buffer {
        &self.buffer
    }
}

impl Resource for WgpuBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn size(&self) -> u64 {
        self.buffer.size()
    }

    fn gpu_virtual_address(&self) -> Option<u64> {
        None
    }
}
