use std::collections::VecDeque;
use std::sync::Arc;

use crate::command::{CommandError, CommandListManager, FenceValue, NewCommandList};
use crate::descriptor::{DescriptorAllocator, DescriptorHandle, DescriptorHeapPool};
use crate::device::create_device;
use crate::hal::{self, Command, CommandListType, DescriptorHeapType};

use super::{RendererConfig, RendererError};

/// Owns the device and everything built on it.
///
/// Teardown happens in [`destroy`](Self::destroy) (or on drop): drain the GPU,
/// destroy the queues, then release the descriptor heaps.
pub struct Renderer {
    device: Arc<dyn hal::Device>,
    manager: CommandListManager,
    heap_pool: Arc<DescriptorHeapPool>,
    descriptor_allocators: [DescriptorAllocator; DescriptorHeapType::COUNT],
    in_flight: VecDeque<FenceValue>,
    frames_in_flight: usize,
    frame_index: u64,
    elapsed: f32,
    destroyed: bool,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Result<Self, RendererError> {
        if config.frames_in_flight == 0 {
            return Err(RendererError::Config(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let device = create_device(&config.device)?;
        Self::with_device(device, config.frames_in_flight)
    }

    /// Builds the renderer on an already created device.
    pub fn with_device(
        device: Arc<dyn hal::Device>,
        frames_in_flight: usize,
    ) -> Result<Self, RendererError> {
        if frames_in_flight == 0 {
            return Err(RendererError::Config(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let mut manager = CommandListManager::new();
        manager.initialize(Arc::clone(&device))?;

        let heap_pool = Arc::new(DescriptorHeapPool::new(Arc::clone(&device)));
        let descriptor_allocators =
            DescriptorHeapType::ALL.map(|ty| DescriptorAllocator::new(Arc::clone(&heap_pool), ty));

        log::debug!(
            "renderer initialized ({frames_in_flight} frame(s) in flight)"
        );

        Ok(Self {
            device,
            manager,
            heap_pool,
            descriptor_allocators,
            in_flight: VecDeque::with_capacity(frames_in_flight),
            frames_in_flight,
            frame_index: 0,
            elapsed: 0.0,
            destroyed: false,
        })
    }

    pub fn device(&self) -> &Arc<dyn hal::Device> {
        &self.device
    }

    pub fn manager(&self) -> &CommandListManager {
        &self.manager
    }

    pub fn heap_pool(&self) -> &Arc<DescriptorHeapPool> {
        &self.heap_pool
    }

    /// Number of frames submitted so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Fence values of submitted frames that may still be running, oldest first.
    pub fn in_flight(&self) -> impl Iterator<Item = FenceValue> + '_ {
        self.in_flight.iter().copied()
    }

    /// Total simulated time, in seconds.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn update(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    /// Records and submits one frame on the graphics queue.
    ///
    /// Waits for the oldest outstanding frame first when `frames_in_flight` frames
    /// are already queued. Returns the fence value of the submitted frame.
    pub fn render(&mut self) -> Result<FenceValue, RendererError> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }

        if self.in_flight.len() >= self.frames_in_flight {
            if let Some(oldest) = self.in_flight.pop_front() {
                self.manager.wait_for_fence(oldest)?;
            }
        }

        let NewCommandList {
            mut list,
            allocator,
        } = self
            .manager
            .create_new_command_list(CommandListType::Direct)?;
        let queue = self.manager.graphics_queue();

        if let Err(err) = record_frame(list.as_mut(), self.frame_index) {
            log::error!("recording frame {} failed: {err}", self.frame_index);
            // Never submitted, so the allocator is immediately reusable.
            queue.discard_allocator(queue.last_completed_fence_value(), allocator);
            return Err(err.into());
        }

        let value = match queue.execute_command_list(list.as_mut()) {
            Ok(value) => value,
            Err(err) => {
                // A submitted but unfenced list keeps its allocator busy until the
                // next signal on the queue.
                let reusable_at = match &err {
                    CommandError::Unfenced { pending, .. } => *pending,
                    _ => queue.last_completed_fence_value(),
                };
                queue.discard_allocator(reusable_at, allocator);
                return Err(err.into());
            }
        };
        queue.discard_allocator(value, allocator);

        self.in_flight.push_back(value);
        self.frame_index += 1;
        log::trace!("frame {} submitted as {value}", self.frame_index);
        Ok(value)
    }

    /// Reserves `count` CPU-visible descriptors of `ty`.
    pub fn allocate_descriptors(
        &mut self,
        ty: DescriptorHeapType,
        count: u32,
    ) -> Result<DescriptorHandle, RendererError> {
        if self.destroyed {
            return Err(RendererError::Destroyed);
        }
        Ok(self.descriptor_allocators[ty.index()].allocate(count)?)
    }

    /// Waits for the GPU to go idle, then tears everything down. Safe to call twice.
    ///
    /// Teardown completes even when the idle wait fails; the failure is returned.
    pub fn destroy(&mut self) -> Result<(), RendererError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let idle = self.manager.idle_gpu();
        self.in_flight.clear();
        self.manager.destroy();
        self.heap_pool.destroy_all();
        log::debug!("renderer destroyed after {} frame(s)", self.frame_index);

        idle.map_err(RendererError::from)
    }
}

fn record_frame(list: &mut dyn hal::CommandList, frame_index: u64) -> hal::HalResult<()> {
    list.record(Command::BeginEvent(format!("frame {frame_index}")))?;
    list.record(Command::Marker("render".into()))?;
    list.record(Command::EndEvent)
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log::error!("renderer teardown: {err}");
        }
    }
}
