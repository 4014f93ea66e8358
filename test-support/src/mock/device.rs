//! 块设备的 Mock 实现
//!
//! 内存模拟的块设备，用作交换区。

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sync::SpinLock;

/// 内存模拟的块设备
pub struct MockBlockDevice {
    data: SpinLock<Vec<u8>>,
    block_size: usize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockBlockDevice {
    /// 创建 `blocks` 个块、每块 `block_size` 字节的设备
    pub fn new(blocks: usize, block_size: usize) -> Self {
        Self {
            data: SpinLock::new(vec![0u8; blocks * block_size]),
            block_size,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// 读取一个块
    pub fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        if buf.len() != self.block_size {
            return false;
        }
        let data = self.data.lock();
        let offset = block_id * self.block_size;
        if offset + self.block_size > data.len() {
            return false;
        }
        buf.copy_from_slice(&data[offset..offset + self.block_size]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 写入一个块
    pub fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        if buf.len() != self.block_size || self.fail_writes.load(Ordering::Relaxed) {
            return false;
        }
        let mut data = self.data.lock();
        let offset = block_id * self.block_size;
        if offset + self.block_size > data.len() {
            return false;
        }
        data[offset..offset + self.block_size].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 块大小（字节）
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 总块数
    pub fn total_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }

    /// 成功的块读取次数
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 成功的块写入次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 让之后的写入全部失败（或恢复正常）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}
