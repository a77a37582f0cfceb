use std::fmt;
use std::sync::Arc;

use crate::hal::{self, CommandListType};

use super::allocator_pool::CommandAllocator;
use super::error::{CommandError, CommandResult, hal};
use super::queue::CommandQueue;
use super::FenceValue;

/// The three hardware queues the engine drives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Copy,
}

impl QueueType {
    /// Number of queues a manager owns.
    pub const COUNT: usize = 3;

    /// Drain order used by `CommandListManager::idle_gpu`.
    pub const ALL: [QueueType; Self::COUNT] =
        [QueueType::Graphics, QueueType::Compute, QueueType::Copy];

    /// Position of the queue in `CommandListManager`'s queue array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Command list type executed by this queue.
    pub fn list_type(self) -> CommandListType {
        match self {
            QueueType::Graphics => CommandListType::Direct,
            QueueType::Compute => CommandListType::Compute,
            QueueType::Copy => CommandListType::Copy,
        }
    }

    /// `None` for list types that have no queue of their own.
    pub fn from_list_type(ty: CommandListType) -> Option<Self> {
        match ty {
            CommandListType::Direct => Some(QueueType::Graphics),
            CommandListType::Compute => Some(QueueType::Compute),
            CommandListType::Copy => Some(QueueType::Copy),
            CommandListType::Bundle
            | CommandListType::VideoDecode
            | CommandListType::VideoProcess
            | CommandListType::VideoEncode => None,
        }
    }
}

/// A freshly created command list in the recording state, with the allocator behind it.
///
/// After submitting the list, hand the allocator back with
/// [`CommandQueue::discard_allocator`] and the returned fence value.
pub struct NewCommandList {
    /// The list, ready to record.
    pub list: Box<dyn hal::CommandList>,

    /// Allocator backing `list`. Stays checked out until its fence value completes.
    pub allocator: CommandAllocator,
}

impl fmt::Debug for NewCommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCommandList")
            .field("list", &self.list)
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// Owns the graphics, compute and copy queues.
///
/// Single entry point for creating command lists and for waits that span queues.
#[derive(Debug)]
pub struct CommandListManager {
    device: Option<Arc<dyn hal::Device>>,
    queues: [CommandQueue; QueueType::COUNT],
}

fn new_queues() -> [CommandQueue; QueueType::COUNT] {
    QueueType::ALL.map(|ty| CommandQueue::new(ty.list_type()))
}

impl Default for CommandListManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandListManager {
    /// Creates a manager with three uninitialized queues.
    pub fn new() -> Self {
        Self {
            device: None,
            queues: new_queues(),
        }
    }

    /// Initializes all three queues, or none of them.
    ///
    /// On failure the queues that did come up are destroyed and the manager stays
    /// uninitialized, so the call can be retried.
    pub fn initialize(&mut self, device: Arc<dyn hal::Device>) -> CommandResult<()> {
        if let Some(queue) = self.queues.iter().find(|q| q.is_ready()) {
            return Err(CommandError::AlreadyInitialized(queue.ty()).logged());
        }
        if let Some(queue) = self.queues.iter().find(|q| q.is_destroyed()) {
            return Err(CommandError::Destroyed(queue.ty()).logged());
        }

        let mut staged = new_queues();
        for index in 0..staged.len() {
            if let Err(err) = staged[index].initialize(&device) {
                for queue in &mut staged[..index] {
                    queue.destroy();
                }
                log::error!("command list manager initialization rolled back");
                return Err(err);
            }
        }

        self.queues = staged;
        self.device = Some(device);
        log::debug!("command list manager initialized");
        Ok(())
    }

    /// Destroys the queues. Call [`idle_gpu`](Self::idle_gpu) first.
    pub fn destroy(&mut self) {
        for queue in &mut self.queues {
            queue.destroy();
        }
        self.device = None;
    }

    /// True between a successful `initialize` and `destroy`.
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Device the queues were created on, while initialized.
    pub fn device(&self) -> Option<&Arc<dyn hal::Device>> {
        self.device.as_ref()
    }

    /// The queue of `ty`, whether or not it is initialized.
    pub fn queue_of(&self, ty: QueueType) -> &CommandQueue {
        &self.queues[ty.index()]
    }

    /// Queue executing `Direct` lists.
    pub fn graphics_queue(&self) -> &CommandQueue {
        self.queue_of(QueueType::Graphics)
    }

    /// Queue executing `Compute` lists.
    pub fn compute_queue(&self) -> &CommandQueue {
        self.queue_of(QueueType::Compute)
    }

    /// Queue executing `Copy` lists.
    pub fn copy_queue(&self) -> &CommandQueue {
        self.queue_of(QueueType::Copy)
    }

    /// Queue for a command list type. Bundles and video types have none.
    pub fn queue(&self, ty: CommandListType) -> CommandResult<&CommandQueue> {
        QueueType::from_list_type(ty)
            .map(|queue| self.queue_of(queue))
            .ok_or_else(|| CommandError::UnsupportedListType(ty).logged())
    }

    /// Queue that issued `value`, found through its type tag.
    pub fn queue_for_fence(&self, value: FenceValue) -> CommandResult<&CommandQueue> {
        let ty = value
            .list_type()
            .ok_or_else(|| CommandError::UnknownFence(value).logged())?;
        self.queue(ty)
    }

    /// Creates a command list of `ty` bound to an allocator from the matching queue.
    pub fn create_new_command_list(&self, ty: CommandListType) -> CommandResult<NewCommandList> {
        if ty == CommandListType::Bundle {
            return Err(CommandError::UnsupportedListType(ty).logged());
        }
        let queue = self.queue(ty)?;
        let device = self.device.as_ref().ok_or_else(|| CommandError::NotInitialized(ty).logged())?;

        let allocator = queue.request_allocator()?;
        match device.create_command_list(ty, allocator.raw()) {
            Ok(mut list) => {
                list.set_name(&format!("{ty} command list"));
                Ok(NewCommandList { list, allocator })
            }
            Err(source) => {
                // Nothing was recorded; the allocator can go straight back.
                queue.discard_allocator(queue.last_completed_fence_value(), allocator);
                Err(hal("create command list")(source))
            }
        }
    }

    /// Checks `value` on the queue named by its tag.
    pub fn is_fence_complete(&self, value: FenceValue) -> CommandResult<bool> {
        self.queue_for_fence(value)?.is_fence_complete(value)
    }

    /// Blocks until `value` completes on the queue that issued it.
    pub fn wait_for_fence(&self, value: FenceValue) -> CommandResult<()> {
        self.queue_for_fence(value)?.wait_for_fence(value)
    }

    /// Drains graphics, then compute, then copy.
    pub fn idle_gpu(&self) -> CommandResult<()> {
        for queue in &self.queues {
            queue.wait_for_idle()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ErrorKind;
    use crate::hal::Command;
    use crate::hal::soft::{ExecutionMode, Fault, SoftDevice};

    fn soft(mode: ExecutionMode) -> (Arc<SoftDevice>, Arc<dyn hal::Device>) {
        let soft = Arc::new(SoftDevice::new(mode).unwrap());
        let device: Arc<dyn hal::Device> = soft.clone();
        (soft, device)
    }

    fn manager(device: &Arc<dyn hal::Device>) -> CommandListManager {
        let mut manager = CommandListManager::new();
        manager.initialize(Arc::clone(device)).unwrap();
        manager
    }

    fn submit(manager: &CommandListManager, ty: CommandListType) -> FenceValue {
        let NewCommandList {
            mut list,
            allocator,
        } = manager.create_new_command_list(ty).unwrap();
        list.record(Command::Marker("work".into())).unwrap();
        let queue = manager.queue(ty).unwrap();
        let value = queue.execute_command_list(list.as_mut()).unwrap();
        queue.discard_allocator(value, allocator);
        value
    }

    #[test]
    fn queue_types_map_to_list_types() {
        for ty in QueueType::ALL {
            assert_eq!(QueueType::from_list_type(ty.list_type()), Some(ty));
        }
        assert_eq!(QueueType::from_list_type(CommandListType::Bundle), None);
    }

    #[test]
    fn initialize_brings_up_all_queues() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        assert!(manager.is_initialized());
        for ty in QueueType::ALL {
            let queue = manager.queue_of(ty);
            assert!(queue.is_ready());
            assert_eq!(queue.ty(), ty.list_type());
        }
    }

    #[test]
    fn failed_queue_rolls_back_the_others() {
        let (soft, device) = soft(ExecutionMode::Manual);
        soft.inject_fault(Fault::CreateQueue(CommandListType::Compute));

        let mut manager = CommandListManager::new();
        let err = manager.initialize(Arc::clone(&device)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Hardware);
        assert!(!manager.is_initialized());
        assert!(QueueType::ALL.iter().all(|ty| !manager.queue_of(*ty).is_ready()));

        // Nothing was left behind, so a retry succeeds.
        manager.initialize(device).unwrap();
        assert!(manager.graphics_queue().is_ready());
    }

    #[test]
    fn initialize_twice_fails() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let mut manager = manager(&device);
        let err = manager.initialize(device).unwrap_err();
        assert!(matches!(err, CommandError::AlreadyInitialized(_)));
    }

    #[test]
    fn bundles_and_video_lists_are_unsupported() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        for ty in [
            CommandListType::Bundle,
            CommandListType::VideoDecode,
            CommandListType::VideoProcess,
            CommandListType::VideoEncode,
        ] {
            let err = manager.create_new_command_list(ty).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported);
            assert!(manager.queue(ty).is_err());
        }
    }

    #[test]
    fn command_list_uses_allocator_of_its_queue() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        let new = manager
            .create_new_command_list(CommandListType::Copy)
            .unwrap();
        assert_eq!(new.list.ty(), CommandListType::Copy);
        assert_eq!(new.allocator.ty(), CommandListType::Copy);
        assert_eq!(manager.copy_queue().pool().size(), 1);
        assert_eq!(manager.graphics_queue().pool().size(), 0);
    }

    #[test]
    fn failed_list_creation_returns_the_allocator() {
        let (soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        soft.inject_fault(Fault::CreateCommandList);

        assert!(manager.create_new_command_list(CommandListType::Direct).is_err());
        assert_eq!(manager.graphics_queue().pool().ready_len(), 1);

        manager
            .create_new_command_list(CommandListType::Direct)
            .unwrap();
        assert_eq!(manager.graphics_queue().pool().size(), 1);
    }

    #[test]
    fn fence_routing_follows_the_tag() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        let value = submit(&manager, CommandListType::Compute);
        assert_eq!(
            manager.queue_for_fence(value).unwrap().ty(),
            CommandListType::Compute
        );
        assert!(!manager.is_fence_complete(value).unwrap());
        manager.wait_for_fence(value).unwrap();
        assert!(manager.is_fence_complete(value).unwrap());

        let bogus = FenceValue::from_raw(0x42 << 56);
        assert!(matches!(
            manager.queue_for_fence(bogus),
            Err(CommandError::UnknownFence(_))
        ));
    }

    #[test]
    fn stall_for_fence_orders_queues_on_the_gpu() {
        let (soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);

        let copy_done = submit(&manager, CommandListType::Copy);
        let graphics = manager.graphics_queue();
        graphics.stall_for_fence(&manager, copy_done).unwrap();
        let frame = graphics.increment_fence().unwrap();

        assert!(!graphics.is_fence_complete(frame).unwrap());
        soft.flush();
        assert!(manager.copy_queue().is_fence_complete(copy_done).unwrap());
        assert!(graphics.is_fence_complete(frame).unwrap());
    }

    #[test]
    fn idle_gpu_drains_every_queue() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let manager = manager(&device);
        let values: Vec<_> = QueueType::ALL
            .iter()
            .map(|ty| submit(&manager, ty.list_type()))
            .collect();

        manager.idle_gpu().unwrap();
        manager.idle_gpu().unwrap();
        for value in values {
            assert!(manager.is_fence_complete(value).unwrap());
        }
    }

    #[test]
    fn destroy_releases_queues() {
        let (_soft, device) = soft(ExecutionMode::Manual);
        let mut manager = manager(&device);
        submit(&manager, CommandListType::Direct);
        manager.idle_gpu().unwrap();
        manager.destroy();
        assert!(!manager.is_initialized());
        assert_eq!(manager.graphics_queue().pool().size(), 0);
        assert!(manager.create_new_command_list(CommandListType::Direct).is_err());

        let err = manager.initialize(device).unwrap_err();
        assert!(matches!(err, CommandError::Destroyed(_)));
    }
}
