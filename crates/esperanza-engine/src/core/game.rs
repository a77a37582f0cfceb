use anyhow::{Context, Result};

use crate::renderer::{Renderer, RendererConfig};
use crate::time::FrameClock;

use super::{App, AppControl, FrameCtx};

/// Headless game driver: owns the renderer for the lifetime of [`run`](Self::run).
#[derive(Debug, Clone)]
pub struct Game {
    name: String,
    config: RendererConfig,
    frame_limit: Option<u64>,
}

impl Game {
    pub fn new(name: impl Into<String>, config: RendererConfig) -> Self {
        Self {
            name: name.into(),
            config,
            frame_limit: None,
        }
    }

    /// Stops the loop after `frames` rendered frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `app` until it returns [`AppControl::Exit`], the frame limit is hit, or
    /// a frame fails. Returns the number of frames rendered.
    pub fn run<A: App>(&self, mut app: A) -> Result<u64> {
        log::info!("{}: starting", self.name);

        let mut renderer = Renderer::new(self.config.clone())
            .with_context(|| format!("{}: failed to create renderer", self.name))?;
        app.on_init(&mut renderer)
            .with_context(|| format!("{}: app initialization failed", self.name))?;

        let result = self.frame_loop(&mut app, &mut renderer);
        let frames = renderer.frame_index();
        let teardown = renderer
            .destroy()
            .with_context(|| format!("{}: renderer teardown failed", self.name));

        // A frame error wins over a teardown error.
        result?;
        teardown?;

        log::info!("{}: exited after {frames} frame(s)", self.name);
        Ok(frames)
    }

    fn frame_loop<A: App>(&self, app: &mut A, renderer: &mut Renderer) -> Result<()> {
        let mut clock = FrameClock::new();

        loop {
            if self
                .frame_limit
                .is_some_and(|limit| renderer.frame_index() >= limit)
            {
                return Ok(());
            }

            let time = clock.tick();
            renderer.update(time.dt);

            let control = app.on_frame(&mut FrameCtx {
                time,
                renderer: &mut *renderer,
            });
            if control == AppControl::Exit {
                log::debug!("{}: exit requested at frame {}", self.name, time.frame_index);
                return Ok(());
            }

            renderer
                .render()
                .with_context(|| format!("{}: frame {} failed", self.name, time.frame_index))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInit;
    use crate::hal::DescriptorHeapType;

    fn game() -> Game {
        Game::new(
            "test",
            RendererConfig {
                device: DeviceInit::soft(),
                frames_in_flight: 2,
            },
        )
    }

    struct ExitAfter(u64);

    impl App for ExitAfter {
        fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
            if ctx.time.frame_index >= self.0 {
                AppControl::Exit
            } else {
                AppControl::Continue
            }
        }
    }

    #[test]
    fn app_exit_stops_the_loop() {
        assert_eq!(game().run(ExitAfter(5)).unwrap(), 5);
    }

    #[test]
    fn frame_limit_stops_the_loop() {
        assert_eq!(game().with_frame_limit(3).run(ExitAfter(u64::MAX)).unwrap(), 3);
    }

    #[test]
    fn init_failure_aborts_before_rendering() {
        struct Broken;

        impl App for Broken {
            fn on_init(&mut self, _: &mut Renderer) -> anyhow::Result<()> {
                anyhow::bail!("no assets")
            }

            fn on_frame(&mut self, _: &mut FrameCtx<'_>) -> AppControl {
                unreachable!()
            }
        }

        let err = game().run(Broken).unwrap_err();
        assert!(format!("{err:#}").contains("no assets"));
    }

    #[test]
    fn app_sees_renderer_state() {
        struct Probe {
            seen: Vec<u64>,
        }

        impl App for Probe {
            fn on_init(&mut self, renderer: &mut Renderer) -> anyhow::Result<()> {
                renderer.allocate_descriptors(DescriptorHeapType::Rtv, 2)?;
                Ok(())
            }

            fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
                self.seen.push(ctx.renderer.frame_index());
                assert!(ctx.renderer.elapsed() > 0.0);
                AppControl::Continue
            }
        }

        let mut probe = Probe { seen: Vec::new() };
        let frames = game().with_frame_limit(4).run(&mut probe).unwrap();
        assert_eq!(frames, 4);
        assert_eq!(probe.seen, vec![0, 1, 2, 3]);
    }
}
