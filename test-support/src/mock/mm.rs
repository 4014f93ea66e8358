//! 内存管理相关操作的 Mock 实现

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::collections::btree_map::BTreeMap;
use sync::SpinLock;

/// 测试用页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// Mock 的内存管理架构操作
///
/// 默认实现采用“恒等映射”（vaddr == paddr），配合 [`PhysArena`] 使用。
pub struct MockMmOps;

impl MockMmOps {
    pub const fn new() -> Self {
        Self
    }

    /// 将物理地址转换为虚拟地址（测试默认：恒等映射）
    pub fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        paddr
    }
}

impl Default for MockMmOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();

/// 一段按页对齐的宿主内存，充当“物理内存”。
///
/// 由于 [`MockMmOps`] 是恒等映射，物理页号就是宿主地址除以页大小。
pub struct PhysArena {
    base: *mut u8,
    layout: Layout,
    frames: usize,
}

// SAFETY: arena 只是一块裸内存，并发访问的正确性由使用方（帧表）保证
unsafe impl Send for PhysArena {}
unsafe impl Sync for PhysArena {}

impl PhysArena {
    /// 分配 `frames` 个页大小的物理帧
    pub fn new(frames: usize) -> Self {
        assert!(frames > 0);
        let layout = Layout::from_size_align(frames * MOCK_PAGE_SIZE, MOCK_PAGE_SIZE)
            .expect("bad arena layout");
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "arena allocation failed");
        Self {
            base,
            layout,
            frames,
        }
    }

    /// 第一个物理页号
    pub fn start_ppn(&self) -> usize {
        self.base as usize / MOCK_PAGE_SIZE
    }

    /// 结束物理页号（不包含）
    pub fn end_ppn(&self) -> usize {
        self.start_ppn() + self.frames
    }

    /// 帧数量
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl Drop for PhysArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

/// Mock 页表
///
/// 记录 `vpn -> (ppn, flag bits)`。标志位的含义由 `vm` crate 决定，
/// 这里只做原样存储，并提供模拟硬件置位 accessed/dirty 的辅助方法。
pub struct MockPageTable {
    entries: SpinLock<BTreeMap<usize, (usize, usize)>>,
}

impl MockPageTable {
    pub const fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// 建立映射，已存在时返回 false
    pub fn map(&self, vpn: usize, ppn: usize, bits: usize) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&vpn) {
            return false;
        }
        entries.insert(vpn, (ppn, bits));
        true
    }

    /// 解除映射，不存在时返回 false
    pub fn unmap(&self, vpn: usize) -> bool {
        self.entries.lock().remove(&vpn).is_some()
    }

    /// 查询映射
    pub fn get(&self, vpn: usize) -> Option<(usize, usize)> {
        self.entries.lock().get(&vpn).copied()
    }

    /// 覆盖标志位
    pub fn set_bits(&self, vpn: usize, bits: usize) -> bool {
        match self.entries.lock().get_mut(&vpn) {
            Some(entry) => {
                entry.1 = bits;
                true
            }
            None => false,
        }
    }

    /// 追加标志位（模拟硬件访问时置位）
    pub fn or_bits(&self, vpn: usize, bits: usize) -> bool {
        match self.entries.lock().get_mut(&vpn) {
            Some(entry) => {
                entry.1 |= bits;
                true
            }
            None => false,
        }
    }

    /// 当前映射数量
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 是否没有任何映射
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MockPageTable {
    fn default() -> Self {
        Self::new()
    }
}
