//! 虚拟内存子系统的全局状态
//!
//! 交换区与帧表在所有进程之间共享，各进程的 [`AddressSpace`] 持有指向它的 `Arc`。

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::config::VmConfig;
use crate::error::VmResult;
use crate::frame_allocator::FrameSource;
use crate::frame_table::FrameTable;
use crate::memory_space::{AddressSpace, Pid};
use crate::page_table::PageTable;
use crate::swap::{BlockDevice, SwapStore};

/// 虚拟内存子系统
pub struct VmSystem {
    config: VmConfig,
    swap: Arc<SwapStore>,
    frames: FrameTable,
}

impl VmSystem {
    /// 初始化子系统：在 `swap_device` 上建立交换区，用 `frames` 中的物理帧建立帧表
    pub fn new(
        config: VmConfig,
        frames: Box<dyn FrameSource>,
        swap_device: Arc<dyn BlockDevice>,
    ) -> VmResult<Arc<Self>> {
        let swap = Arc::new(SwapStore::new(swap_device)?);
        log::info!(
            "vm: {} frames, {} swap slots, user space ends at {:#x}",
            frames.total(),
            swap.capacity(),
            config.user_space_end
        );
        Ok(Arc::new(Self {
            config,
            frames: FrameTable::new(frames, swap.clone()),
            swap,
        }))
    }

    /// 布局参数
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// 帧表
    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    /// 交换区
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// 为进程 `pid` 创建空的地址空间，`page_table` 是它的硬件页表
    pub fn create_address_space(
        self: &Arc<Self>,
        pid: Pid,
        page_table: Arc<dyn PageTable>,
    ) -> AddressSpace {
        AddressSpace::new(pid, self.clone(), page_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Ppn;
    use crate::error::VmError;
    use crate::frame_allocator::FrameAllocator;
    use crate::tests::mocks::{swap_device, MockBlockDevice};

    #[test]
    fn test_swap_device_block_size_must_divide_page() {
        let device = Arc::new(MockBlockDevice::new(16, 3000));
        let result = VmSystem::new(
            VmConfig::default(),
            Box::new(FrameAllocator::new(Ppn(0), Ppn(4))),
            device,
        );
        assert_eq!(result.err().map(|e| e.to_errno()), Some(VmError::InvalidArgument.to_errno()));
    }

    #[test]
    fn test_initial_state() {
        let vm = VmSystem::new(
            VmConfig::default(),
            Box::new(FrameAllocator::new(Ppn(0), Ppn(4))),
            swap_device(3),
        )
        .unwrap();
        let stats = vm.frame_table().stats();
        assert_eq!((stats.total, stats.in_use, stats.evictions), (4, 0, 0));
        assert_eq!(vm.swap().capacity(), 3);
        assert_eq!(vm.config().first_map_id, 1);
    }
}
