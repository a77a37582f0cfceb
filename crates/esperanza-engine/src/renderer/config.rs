use crate::device::DeviceInit;

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub device: DeviceInit,

    /// Frames the CPU may run ahead of the GPU before `render` waits.
    pub frames_in_flight: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            device: DeviceInit::default(),
            frames_in_flight: 2,
        }
    }
}
