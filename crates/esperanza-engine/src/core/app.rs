use crate::renderer::Renderer;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract driven by [`Game`](super::Game).
pub trait App {
    /// Called once after the renderer is up, before the first frame.
    fn on_init(&mut self, renderer: &mut Renderer) -> anyhow::Result<()> {
        let _ = renderer;
        Ok(())
    }

    /// Called once per frame, after `Renderer::update` and before `Renderer::render`.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl;
}

impl<A: App + ?Sized> App for &mut A {
    fn on_init(&mut self, renderer: &mut Renderer) -> anyhow::Result<()> {
        (**self).on_init(renderer)
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        (**self).on_frame(ctx)
    }
}
