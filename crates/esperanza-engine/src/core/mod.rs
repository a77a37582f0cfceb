//! Game loop.
//!
//! `Game` builds a `Renderer`, then per frame: tick the clock, `update`, call the
//! app, `render`. The window/message pump is not part of this crate.

mod app;
mod ctx;
mod game;

pub use app::{App, AppControl};
pub use ctx::FrameCtx;
pub use game::Game;
