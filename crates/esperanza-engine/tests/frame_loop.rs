use std::sync::Arc;

use esperanza_engine::command::{CommandListManager, FenceValue, NewCommandList};
use esperanza_engine::core::{App, AppControl, FrameCtx, Game};
use esperanza_engine::device::DeviceInit;
use esperanza_engine::hal::soft::{ExecutionMode, SoftDevice};
use esperanza_engine::hal::{self, Command, CommandListType, DescriptorHeapType};
use esperanza_engine::renderer::{Renderer, RendererConfig};

struct Demo {
    frames: u64,
    fences: Vec<FenceValue>,
}

impl App for Demo {
    fn on_init(&mut self, renderer: &mut Renderer) -> anyhow::Result<()> {
        renderer.allocate_descriptors(DescriptorHeapType::Rtv, 3)?;
        renderer.allocate_descriptors(DescriptorHeapType::Dsv, 1)?;
        Ok(())
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        self.fences.extend(ctx.renderer.in_flight().last());
        if ctx.time.frame_index + 1 >= self.frames {
            AppControl::Exit
        } else {
            AppControl::Continue
        }
    }
}

#[test]
fn game_loop_runs_on_the_threaded_soft_gpu() {
    let config = RendererConfig {
        device: DeviceInit {
            soft_mode: ExecutionMode::Threaded,
            ..DeviceInit::soft()
        },
        frames_in_flight: 3,
    };
    let mut demo = Demo {
        frames: 30,
        fences: Vec::new(),
    };

    let rendered = Game::new("integration", config).run(&mut demo).unwrap();

    // The frame that returns Exit is not rendered.
    assert_eq!(rendered, 29);
    assert!(demo.fences.windows(2).all(|w| w[0] < w[1]));
    assert!(
        demo.fences
            .iter()
            .all(|f| f.list_type() == Some(CommandListType::Direct))
    );
}

#[test]
fn concurrent_submission_through_the_manager() {
    let soft = Arc::new(SoftDevice::new(ExecutionMode::Threaded).unwrap());
    let device: Arc<dyn hal::Device> = soft.clone();
    let mut manager = CommandListManager::new();
    manager.initialize(device).unwrap();

    const THREADS: usize = 4;
    const LISTS: usize = 25;
    let types = [
        CommandListType::Direct,
        CommandListType::Compute,
        CommandListType::Copy,
        CommandListType::Direct,
    ];

    let submitted: Vec<Vec<FenceValue>> = std::thread::scope(|s| {
        let handles: Vec<_> = types
            .iter()
            .map(|&ty| {
                let manager = &manager;
                s.spawn(move || {
                    let queue = manager.queue(ty).unwrap();
                    let mut values = Vec::with_capacity(LISTS);
                    for i in 0..LISTS {
                        let NewCommandList {
                            mut list,
                            allocator,
                        } = manager.create_new_command_list(ty).unwrap();
                        list.record(Command::Marker(format!("{ty} {i}"))).unwrap();
                        let value = queue.execute_command_list(list.as_mut()).unwrap();
                        queue.discard_allocator(value, allocator);
                        values.push(value);
                    }
                    values
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(submitted.len(), THREADS);

    // Per thread, values are strictly increasing and tagged with the right queue.
    for (ty, values) in types.iter().zip(&submitted) {
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(values.iter().all(|v| v.list_type() == Some(*ty)));
    }

    // Two threads share the graphics queue: no value is handed out twice.
    let mut direct: Vec<FenceValue> = submitted[0].iter().chain(&submitted[3]).copied().collect();
    direct.sort();
    direct.dedup();
    assert_eq!(direct.len(), 2 * LISTS);

    manager.idle_gpu().unwrap();
    for values in &submitted {
        for value in values {
            assert!(manager.is_fence_complete(*value).unwrap());
        }
    }

    let stats = soft.stats();
    assert_eq!(stats.executed_lists, (THREADS * LISTS) as u64);
    assert_eq!(stats.stale_executions, 0);

    manager.destroy();
}
