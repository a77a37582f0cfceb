//! Esperanza engine crate.
//!
//! GPU command submission and synchronization:
//! - `hal`: backend seam (soft reference backend, wgpu backend)
//! - `command`: per-type command queues with fence tracking and allocator recycling
//! - `descriptor`: CPU descriptor allocation and shader-visible descriptor heaps
//! - `resource`: GPU resources with state tracking
//! - `renderer` / `core`: the renderer context and the headless game loop

pub mod command;
pub mod core;
pub mod descriptor;
pub mod device;
pub mod hal;
pub mod renderer;
pub mod resource;
pub mod time;

pub mod logging;
