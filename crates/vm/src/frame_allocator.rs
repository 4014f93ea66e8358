//! 物理帧来源
//!
//! 帧表通过 [`FrameSource`] 获取和归还物理帧。本模块同时提供一个
//! 基于位图的实现 [`FrameAllocator`]，管理一段连续的物理页号范围。
//!
//! ## 分配策略（位图）
//!
//! - **bitmap**：每个 bit 表示一个物理帧（0=空闲，1=已分配）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! 单帧分配从 last_alloc_hint 开始循环查找第一个空闲位；
//! 释放时直接清除对应 bit，O(1) 操作。
//!
//! 分配出的帧内容不保证为零，需要干净页面的调用方使用 [`clear_frame`]。

use crate::address::{PageNum, Ppn, UsizeConvert};
use crate::config::PAGE_SIZE;
use alloc::vec::Vec;

/// 物理帧来源
///
/// 调用方（帧表）负责串行化对它的访问。
pub trait FrameSource: Send {
    /// 分配一个物理帧，物理内存耗尽时返回 None
    fn alloc(&mut self) -> Option<Ppn>;

    /// 归还一个物理帧
    fn dealloc(&mut self, ppn: Ppn);

    /// 可管理的物理帧总数
    fn total(&self) -> usize;
}

/// 将指定的物理页帧清零。
pub fn clear_frame(ppn: Ppn) {
    // SAFETY: 调用方持有该帧（已钉住或刚分配），没有其他写者
    unsafe { frame_bytes(ppn) }.fill(0);
}

/// 通过内核直接映射区以字节切片的形式访问物理帧。
///
/// # Safety
/// 调用方必须独占该帧的访问（帧已被钉住或仍在帧表锁内），
/// 且返回的切片不能在帧被释放后继续使用。
pub unsafe fn frame_bytes<'a>(ppn: Ppn) -> &'a mut [u8] {
    let va = ppn.start_addr().to_vaddr().as_mut_ptr::<u8>();
    unsafe { core::slice::from_raw_parts_mut(va, PAGE_SIZE) }
}

/// 物理帧分配器。
/// 采用位图策略跟踪每个物理帧的分配状态。
#[derive(Debug)]
pub struct FrameAllocator {
    /// 物理帧的起始 Ppn。
    start: Ppn,
    /// 位图数据（每个 bit 表示一个帧：0=空闲，1=已分配）。
    bitmap: Vec<u64>,
    /// 总帧数。
    total_frames: usize,
    /// 上次分配的位置提示（用于加速单帧分配）。
    last_alloc_hint: usize,
}

impl FrameAllocator {
    /// 创建管理 `[start, end)` 范围的帧分配器
    pub fn new(start: Ppn, end: Ppn) -> Self {
        let total_frames = end.as_usize().saturating_sub(start.as_usize());
        FrameAllocator {
            start,
            bitmap: alloc::vec![0u64; total_frames.div_ceil(64)],
            total_frames,
            last_alloc_hint: 0,
        }
    }

    /// 检查帧是否空闲
    #[inline]
    fn is_free(&self, frame_idx: usize) -> bool {
        (self.bitmap[frame_idx / 64] & (1u64 << (frame_idx % 64))) == 0
    }
}

impl FrameSource for FrameAllocator {
    fn alloc(&mut self) -> Option<Ppn> {
        let bitmap_len = self.bitmap.len();
        let start_idx = self.last_alloc_hint;

        // 循环查找：[hint, end) + [0, hint)
        for offset in 0..bitmap_len {
            let idx = (start_idx + offset) % bitmap_len;
            let word = self.bitmap[idx];

            // 快速跳过全满的 u64
            if word == u64::MAX {
                continue;
            }

            let frame_idx = idx * 64 + (!word).trailing_zeros() as usize;
            if frame_idx >= self.total_frames {
                continue;
            }

            self.bitmap[idx] |= 1u64 << (frame_idx % 64);
            self.last_alloc_hint = idx;
            return Some(self.start + frame_idx);
        }

        None // 内存耗尽
    }

    fn dealloc(&mut self, ppn: Ppn) {
        debug_assert!(
            ppn >= self.start && ppn.as_usize() < self.start.as_usize() + self.total_frames,
            "dealloc: frame out of range"
        );
        let frame_idx = ppn.as_usize() - self.start.as_usize();
        debug_assert!(!self.is_free(frame_idx), "dealloc: double free detected");

        self.bitmap[frame_idx / 64] &= !(1u64 << (frame_idx % 64));
    }

    fn total(&self) -> usize {
        self.total_frames
    }
}
