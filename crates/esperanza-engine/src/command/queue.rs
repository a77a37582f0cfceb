use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::hal::{self, CommandListType};

use super::allocator_pool::{CommandAllocator, CommandAllocatorPool};
use super::error::{CommandError, CommandResult, hal};
use super::manager::CommandListManager;
use super::FenceValue;

#[derive(Debug)]
struct NativeQueue {
    device: Arc<dyn hal::Device>,
    queue: Box<dyn hal::Queue>,
    fence: Arc<dyn hal::Fence>,
}

#[derive(Debug)]
enum QueueState {
    Uninitialized,
    Ready(NativeQueue),
    Destroyed,
}

/// One hardware queue with its fence and allocator pool.
///
/// Fence values issued by a queue carry its type tag; see [`FenceValue`].
/// Submission and allocator requests are serialized by the fence mutex. CPU waits
/// never take it, so a waiting thread does not hold up submitters.
#[derive(Debug)]
pub struct CommandQueue {
    ty: CommandListType,
    state: QueueState,
    pool: CommandAllocatorPool,
    /// Next value to signal. Guards signal ordering too.
    next_fence_value: Mutex<FenceValue>,
    /// Cached completed value; only moves forward.
    last_completed: AtomicU64,
}

impl CommandQueue {
    /// Creates an uninitialized queue of `ty`. Nothing native exists until `initialize`.
    pub fn new(ty: CommandListType) -> Self {
        Self {
            ty,
            state: QueueState::Uninitialized,
            pool: CommandAllocatorPool::new(ty),
            next_fence_value: Mutex::new(FenceValue::new(ty, 1)),
            last_completed: AtomicU64::new(FenceValue::initial(ty).raw()),
        }
    }

    /// Creates the native queue and fence and signals the type-tagged initial value.
    ///
    /// Fails when already initialized, destroyed, or when the allocator pool is not empty.
    pub fn initialize(&mut self, device: &Arc<dyn hal::Device>) -> CommandResult<()> {
        match self.state {
            QueueState::Uninitialized => {}
            QueueState::Ready(_) => return Err(CommandError::AlreadyInitialized(self.ty).logged()),
            QueueState::Destroyed => return Err(CommandError::Destroyed(self.ty).logged()),
        }
        let len = self.pool.size();
        if len != 0 {
            return Err(CommandError::PoolNotEmpty { ty: self.ty, len }.logged());
        }

        let queue = device
            .create_command_queue(self.ty)
            .map_err(hal("create command queue"))?;
        queue.set_name(&format!("{} command queue", self.ty));

        let initial = FenceValue::initial(self.ty);
        let fence = device.create_fence(0).map_err(hal("create fence"))?;
        fence.set_name(&format!("{} queue fence", self.ty));
        fence
            .signal(initial.raw())
            .map_err(hal("signal initial fence value"))?;

        *self.next_fence_value.get_mut() = initial.next();
        self.last_completed.store(initial.raw(), Ordering::Release);
        self.state = QueueState::Ready(NativeQueue {
            device: Arc::clone(device),
            queue,
            fence,
        });

        log::debug!("{} command queue initialized", self.ty);
        Ok(())
    }

    /// Releases the native queue and every pooled allocator. The queue cannot be reused.
    ///
    /// The caller must have drained the queue first.
    pub fn destroy(&mut self) {
        if let QueueState::Ready(_) = self.state {
            self.pool.shutdown();
            log::debug!("{} command queue destroyed", self.ty);
        }
        self.state = QueueState::Destroyed;
    }

    fn native(&self) -> CommandResult<&NativeQueue> {
        match &self.state {
            QueueState::Ready(native) => Ok(native),
            QueueState::Uninitialized => Err(CommandError::NotInitialized(self.ty).logged()),
            QueueState::Destroyed => Err(CommandError::Destroyed(self.ty).logged()),
        }
    }

    /// Command list type this queue executes.
    pub fn ty(&self) -> CommandListType {
        self.ty
    }

    /// True between a successful `initialize` and `destroy`.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, QueueState::Ready(_))
    }

    /// True once `destroy` ran.
    pub fn is_destroyed(&self) -> bool {
        matches!(self.state, QueueState::Destroyed)
    }

    /// The native queue, e.g. for creating a swap chain on it.
    pub fn raw(&self) -> CommandResult<&dyn hal::Queue> {
        Ok(self.native()?.queue.as_ref())
    }

    pub(crate) fn fence(&self) -> CommandResult<&Arc<dyn hal::Fence>> {
        Ok(&self.native()?.fence)
    }

    /// Allocators owned by this queue.
    pub fn pool(&self) -> &CommandAllocatorPool {
        &self.pool
    }

    /// Value the next signal on this queue will use.
    pub fn next_fence_value(&self) -> FenceValue {
        *self.next_fence_value.lock()
    }

    /// Last value known to be complete, without querying the fence.
    pub fn last_completed_fence_value(&self) -> FenceValue {
        FenceValue::from_raw(self.last_completed.load(Ordering::Acquire))
    }

    fn observe_completed(&self, value: u64) -> u64 {
        let previous = self.last_completed.fetch_max(value, Ordering::AcqRel);
        previous.max(value)
    }

    /// Signals the next fence value on the queue and returns it.
    pub fn increment_fence(&self) -> CommandResult<FenceValue> {
        let native = self.native()?;
        let mut next = self.next_fence_value.lock();
        native
            .queue
            .signal(native.fence.as_ref(), next.raw())
            .map_err(hal("signal fence"))?;
        let signaled = *next;
        *next = signaled.next();
        Ok(signaled)
    }

    /// True once `value` has completed. Only queries the fence when the cached
    /// completed value is behind `value`.
    ///
    /// Fails with [`CommandError::UnknownFence`] when `value` was issued by another queue.
    pub fn is_fence_complete(&self, value: FenceValue) -> CommandResult<bool> {
        self.check_owned(value)?;
        if value.raw() <= self.last_completed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let QueueState::Ready(native) = &self.state else {
            return Ok(false);
        };
        Ok(value.raw() <= self.observe_completed(native.fence.completed_value()))
    }

    /// Blocks the calling thread until `value` completes on this queue.
    pub fn wait_for_fence(&self, value: FenceValue) -> CommandResult<()> {
        if self.is_fence_complete(value)? {
            return Ok(());
        }
        let native = self.native()?;
        native
            .fence
            .wait(value.raw())
            .map_err(hal("wait for fence"))?;
        self.observe_completed(value.raw());
        Ok(())
    }

    fn check_owned(&self, value: FenceValue) -> CommandResult<()> {
        if value.list_type() != Some(self.ty) {
            return Err(CommandError::UnknownFence(value).logged());
        }
        Ok(())
    }

    /// Makes this queue wait on the GPU until `value` completes on the queue that
    /// issued it. Does not block the calling thread.
    pub fn stall_for_fence(
        &self,
        manager: &CommandListManager,
        value: FenceValue,
    ) -> CommandResult<()> {
        let producer = manager.queue_for_fence(value)?;
        let fence = producer.fence()?;
        self.native()?
            .queue
            .wait(fence.as_ref(), value.raw())
            .map_err(hal("stall for fence"))
    }

    /// Makes this queue wait on the GPU for everything `producer` has submitted so far.
    pub fn stall_for_producer(&self, producer: &CommandQueue) -> CommandResult<()> {
        let fence = producer.fence()?;
        let next = producer.next_fence_value();
        if next.sequence() <= 1 {
            return Err(CommandError::NothingSubmitted(producer.ty).logged());
        }
        let last_issued = FenceValue::from_raw(next.raw() - 1);
        self.native()?
            .queue
            .wait(fence.as_ref(), last_issued.raw())
            .map_err(hal("stall for producer"))
    }

    /// Signals a new value and blocks until the queue reaches it.
    pub fn wait_for_idle(&self) -> CommandResult<()> {
        let value = self.increment_fence()?;
        self.wait_for_fence(value)
    }

    /// Closes `list`, submits it and signals the next fence value, which is returned.
    ///
    /// Nothing is submitted when closing fails. When the signal fails after the list
    /// was submitted, [`CommandError::Unfenced`] carries the value the next signal on
    /// this queue will use; the list's allocator must be held back until then.
    pub fn execute_command_list(&self, list: &mut dyn hal::CommandList) -> CommandResult<FenceValue> {
        let native = self.native()?;
        let mut next = self.next_fence_value.lock();

        list.close().map_err(hal("close command list"))?;
        native
            .queue
            .execute(list)
            .map_err(hal("execute command list"))?;
        if let Err(source) = native.queue.signal(native.fence.as_ref(), next.raw()) {
            return Err(CommandError::Unfenced {
                ty: self.ty,
                pending: *next,
                source,
            }
            .logged());
        }

        let signaled = *next;
        *next = signaled.next();
        Ok(signaled)
    }

    /// Checks out an allocator, reusing one only when the fence says its work is done.
    pub fn request_allocator(&self) -> CommandResult<CommandAllocator> {
        let native = self.native()?;
        let _next = self.next_fence_value.lock();
        // Query the fence directly; the cached value may lag behind.
        let completed = self.observe_completed(native.fence.completed_value());
        self.pool
            .request_allocator(native.device.as_ref(), FenceValue::from_raw(completed))
    }

    /// Returns `allocator` for reuse once `fence_value` completes.
    pub fn discard_allocator(&self, fence_value: FenceValue, allocator: CommandAllocator) {
        self.pool.discard_allocator(fence_value, allocator);
    }
}
