//! Frame timing for the game loop.
//!
//! - one `FrameClock` per loop
//! - call `tick()` once per frame to obtain `FrameTime`

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
