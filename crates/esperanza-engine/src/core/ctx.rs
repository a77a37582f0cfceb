use crate::renderer::Renderer;
use crate::time::FrameTime;

/// Per-frame context passed to `core::App::on_frame`.
pub struct FrameCtx<'a> {
    pub time: FrameTime,
    pub renderer: &'a mut Renderer,
}
