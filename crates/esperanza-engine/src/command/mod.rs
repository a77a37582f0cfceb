//! Command submission and GPU/CPU synchronization.
//!
//! Layout:
//! - `CommandAllocatorPool` recycles allocators once their fence value completes
//! - `CommandQueue` owns one hardware queue, its fence and its pool
//! - `CommandListManager` owns the graphics, compute and copy queues
//!
//! Typical frame:
//! 1. `manager.create_new_command_list(ty)` yields a list and its allocator
//! 2. record into the list
//! 3. `queue.execute_command_list(list)` returns the fence value of the submission
//! 4. `queue.discard_allocator(value, allocator)` makes the allocator reusable after it

mod allocator_pool;
mod error;
mod fence;
mod manager;
mod queue;

pub use allocator_pool::{CommandAllocator, CommandAllocatorPool};
pub use error::{CommandError, CommandResult, ErrorKind};
pub use fence::FenceValue;
pub use manager::{CommandListManager, NewCommandList, QueueType};
pub use queue::CommandQueue;
