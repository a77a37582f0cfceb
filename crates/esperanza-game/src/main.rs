use anyhow::{Context, Result};

use esperanza_engine::core::{App, AppControl, FrameCtx, Game};
use esperanza_engine::descriptor::DescriptorHandle;
use esperanza_engine::device::DeviceInit;
use esperanza_engine::hal::DescriptorHeapType;
use esperanza_engine::logging::{LoggingConfig, init_logging};
use esperanza_engine::renderer::{Renderer, RendererConfig};

const DEMO_FRAMES: u64 = 120;

/// Reserves a few render-target views and logs frame timing once a second.
struct Demo {
    render_targets: Vec<DescriptorHandle>,
    since_report: f32,
}

impl App for Demo {
    fn on_init(&mut self, renderer: &mut Renderer) -> Result<()> {
        for _ in 0..renderer.frames_in_flight() {
            let rtv = renderer
                .allocate_descriptors(DescriptorHeapType::Rtv, 1)
                .context("failed to reserve render target view")?;
            self.render_targets.push(rtv);
        }
        renderer
            .allocate_descriptors(DescriptorHeapType::Dsv, 1)
            .context("failed to reserve depth stencil view")?;
        log::info!("reserved {} render target view(s)", self.render_targets.len());
        Ok(())
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        self.since_report += ctx.time.dt;
        if self.since_report >= 1.0 {
            self.since_report = 0.0;
            log::info!(
                "frame {} ({:.2} ms), {} in flight",
                ctx.time.frame_index,
                ctx.time.dt * 1000.0,
                ctx.renderer.in_flight().count()
            );
        }
        AppControl::Continue
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let device = DeviceInit::from_env().context("invalid device configuration")?;
    let config = RendererConfig {
        device,
        ..RendererConfig::default()
    };

    let frames = Game::new("esperanza", config)
        .with_frame_limit(DEMO_FRAMES)
        .run(Demo {
            render_targets: Vec::new(),
            since_report: 0.0,
        })?;

    log::info!("rendered {frames} frame(s)");
    Ok(())
}
