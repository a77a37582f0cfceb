use std::ops::{Add, AddAssign};

/// CPU and (optionally) GPU address of a descriptor or a contiguous descriptor range.
///
/// Offsetting moves both halves by the same byte amount; a missing half stays missing.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct DescriptorHandle {
    cpu: Option<usize>,
    gpu: Option<u64>,
}

impl DescriptorHandle {
    pub const NULL: DescriptorHandle = DescriptorHandle {
        cpu: None,
        gpu: None,
    };

    pub fn new(cpu: usize, gpu: Option<u64>) -> Self {
        Self {
            cpu: Some(cpu),
            gpu,
        }
    }

    pub fn cpu_only(cpu: usize) -> Self {
        Self::new(cpu, None)
    }

    pub fn cpu_ptr(&self) -> Option<usize> {
        self.cpu
    }

    pub fn gpu_ptr(&self) -> Option<u64> {
        self.gpu
    }

    pub fn is_null(&self) -> bool {
        self.cpu.is_none()
    }

    pub fn is_shader_visible(&self) -> bool {
        self.gpu.is_some()
    }
}

impl AddAssign<i64> for DescriptorHandle {
    /// `offset` is in bytes, i.e. already scaled by the descriptor size.
    fn add_assign(&mut self, offset: i64) {
        if let Some(cpu) = self.cpu.as_mut() {
            *cpu = cpu.wrapping_add_signed(offset as isize);
        }
        if let Some(gpu) = self.gpu.as_mut() {
            *gpu = gpu.wrapping_add_signed(offset);
        }
    }
}

impl Add<i64> for DescriptorHandle {
    type Output = DescriptorHandle;

    fn add(mut self, offset: i64) -> Self::Output {
        self += offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_moves_both_halves() {
        let handle = DescriptorHandle::new(0x1000, Some(0x8000)) + 64;
        assert_eq!(handle.cpu_ptr(), Some(0x1040));
        assert_eq!(handle.gpu_ptr(), Some(0x8040));
    }

    #[test]
    fn offset_leaves_null_halves_untouched() {
        let mut cpu_only = DescriptorHandle::cpu_only(0x2000);
        cpu_only += 32;
        assert_eq!(cpu_only.cpu_ptr(), Some(0x2020));
        assert!(!cpu_only.is_shader_visible());

        let null = DescriptorHandle::NULL + 128;
        assert!(null.is_null());
        assert_eq!(null.gpu_ptr(), None);
    }

    #[test]
    fn negative_offsets_step_back() {
        let handle = DescriptorHandle::new(0x1040, Some(0x8040)) + -64;
        assert_eq!(handle, DescriptorHandle::new(0x1000, Some(0x8000)));
    }
}
