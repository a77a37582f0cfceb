//! Descriptor allocation.
//!
//! - `DescriptorAllocator`: unbounded CPU-only allocator fed by a shared `DescriptorHeapPool`
//! - `DescriptorHeap`: fixed-size shader-visible heap, exhaustion is fatal
//! - `DescriptorHandle`: CPU/GPU address pair

mod allocator;
mod error;
mod handle;
mod heap;

pub use allocator::{DescriptorAllocator, DescriptorHeapPool, NUM_DESCRIPTORS_PER_HEAP};
pub use error::{DescriptorError, DescriptorResult};
pub use handle::DescriptorHandle;
pub use heap::DescriptorHeap;
