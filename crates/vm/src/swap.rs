//! 交换区
//!
//! 交换设备被划分为一个个恰好容纳一页的槽（slot），
//! 每个槽的占用状态由位图中的一个 bit 记录（0=空闲，1=已占用）。
//!
//! 位图由独立的自旋锁保护，只在“查找空闲槽并标记占用”与“标记空闲”时持有；
//! 扇区读写在锁外进行，此时槽已经被预留，不会被其他换出者选中。
//!
//! 换出时交换区已满、换入未分配的槽以及设备 I/O 失败都是对系统致命的：
//! 内存内容无法再被安全保存，记录日志后直接 panic。

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;

use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};

/// 块设备驱动程序接口（交换设备）
pub trait BlockDevice: Send + Sync {
    /// 读取一个块，成功返回 true
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool;

    /// 写入一个块，成功返回 true
    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool;

    /// 块大小（字节）
    fn block_size(&self) -> usize;

    /// 总块数
    fn total_blocks(&self) -> usize;
}

/// 交换槽索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// 槽在交换区中的索引
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 交换槽位图
struct SwapBitmap {
    bits: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SwapBitmap {
    fn new(slots: usize) -> Self {
        Self {
            bits: alloc::vec![0u64; slots.div_ceil(64)],
            slots,
            used: 0,
        }
    }

    fn test(&self, idx: usize) -> bool {
        idx < self.slots && self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// 查找第一个空闲槽并标记为占用
    fn scan_and_flip(&mut self) -> Option<usize> {
        for (word_idx, word) in self.bits.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let idx = word_idx * 64 + (!*word).trailing_zeros() as usize;
            if idx >= self.slots {
                return None;
            }
            *word |= 1u64 << (idx % 64);
            self.used += 1;
            return Some(idx);
        }
        None
    }

    fn reset(&mut self, idx: usize) {
        self.bits[idx / 64] &= !(1u64 << (idx % 64));
        self.used -= 1;
    }
}

/// 交换区
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    blocks_per_slot: usize,
    bitmap: SpinLock<SwapBitmap>,
}

impl SwapStore {
    /// 在块设备上建立交换区，块大小必须整除页大小
    pub fn new(device: Arc<dyn BlockDevice>) -> VmResult<Self> {
        let block_size = device.block_size();
        if block_size == 0 || PAGE_SIZE % block_size != 0 {
            return Err(VmError::InvalidArgument);
        }
        let blocks_per_slot = PAGE_SIZE / block_size;
        let slots = device.total_blocks() / blocks_per_slot;
        log::info!("swap: {} slots of {} blocks each", slots, blocks_per_slot);
        Ok(Self {
            device,
            blocks_per_slot,
            bitmap: SpinLock::new(SwapBitmap::new(slots)),
        })
    }

    /// 交换区能容纳的页数
    pub fn capacity(&self) -> usize {
        self.bitmap.lock().slots
    }

    /// 已占用的槽数
    pub fn used(&self) -> usize {
        self.bitmap.lock().used
    }

    /// 槽是否处于占用状态
    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        self.bitmap.lock().test(slot.0)
    }

    /// 将一页内容写入新分配的槽
    ///
    /// # Panics
    /// 交换区已满或设备写入失败时 panic
    pub fn swap_out(&self, page: &[u8]) -> SwapSlot {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let slot = match self.bitmap.lock().scan_and_flip() {
            Some(idx) => SwapSlot(idx),
            None => {
                log::error!("swap: no free slot for swap-out");
                panic!("swap space exhausted");
            }
        };

        let block_size = PAGE_SIZE / self.blocks_per_slot;
        for (i, chunk) in page.chunks(block_size).enumerate() {
            if !self.device.write_block(slot.0 * self.blocks_per_slot + i, chunk) {
                log::error!("swap: write of slot {} failed", slot.0);
                panic!("swap device write failed");
            }
        }
        log::trace!("swap: page written to slot {}", slot.0);
        slot
    }

    /// 将槽中的内容读回到页面，并释放该槽
    ///
    /// 槽只在读取完成后才被标记为空闲。
    ///
    /// # Panics
    /// 槽未被分配或设备读取失败时 panic
    pub fn swap_in(&self, slot: SwapSlot, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        if !self.bitmap.lock().test(slot.0) {
            log::error!("swap: read of unallocated slot {}", slot.0);
            panic!("invalid access to unassigned swap slot");
        }

        let block_size = PAGE_SIZE / self.blocks_per_slot;
        for (i, chunk) in page.chunks_mut(block_size).enumerate() {
            if !self.device.read_block(slot.0 * self.blocks_per_slot + i, chunk) {
                log::error!("swap: read of slot {} failed", slot.0);
                panic!("swap device read failed");
            }
        }

        self.bitmap.lock().reset(slot.0);
        log::trace!("swap: slot {} read back and released", slot.0);
    }

    /// 释放槽而不读取内容（所属进程退出时使用）
    pub fn free(&self, slot: SwapSlot) {
        let mut bitmap = self.bitmap.lock();
        if bitmap.test(slot.0) {
            bitmap.reset(slot.0);
            log::trace!("swap: slot {} discarded", slot.0);
        } else {
            log::warn!("swap: discarding slot {} which is not allocated", slot.0);
        }
    }
}
