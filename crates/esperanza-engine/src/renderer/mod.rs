//! Renderer assembly.
//!
//! `Renderer` is the explicitly constructed context that owns, in teardown order:
//! - the command list manager (graphics, compute and copy queues)
//! - the shared descriptor heap pool and one descriptor allocator per heap type
//! - the device they were all created from

mod config;
mod error;
mod context;

pub use config::RendererConfig;
pub use error::RendererError;
pub use context::Renderer;
