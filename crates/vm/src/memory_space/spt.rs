//! 补充页表
//!
//! 每个进程一张，按虚拟页号有序地保存该进程已知的全部页描述符。
//! 描述符以 `Arc` 共享：帧表只持有指向它的弱引用（反向引用，而非所有权）。

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::address::{PageNum, Vaddr, Vpn, VpnRange};
use crate::error::{VmError, VmResult};
use crate::memory_space::Page;

/// 补充页表
#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Vpn, Arc<Page>>,
}

impl SupplementalPageTable {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// 查找包含 `vaddr` 的页的描述符
    pub fn lookup(&self, vaddr: Vaddr) -> Option<Arc<Page>> {
        self.pages.get(&Vpn::from_addr_floor(vaddr)).cloned()
    }

    /// 注册描述符，同一页已有描述符时返回 [`VmError::AlreadyMapped`]
    pub fn insert(&mut self, page: Arc<Page>) -> VmResult<()> {
        if self.pages.contains_key(&page.vpn()) {
            return Err(VmError::AlreadyMapped);
        }
        self.pages.insert(page.vpn(), page);
        Ok(())
    }

    /// 原子地注册覆盖 `range` 的一组描述符：范围内已有任何描述符时整体失败，表保持不变
    ///
    /// `pages` 必须按顺序逐页覆盖 `range`。
    pub fn insert_all(&mut self, range: &VpnRange, pages: &[Arc<Page>]) -> VmResult<()> {
        debug_assert_eq!(range.len(), pages.len());
        debug_assert!(range.iter().zip(pages).all(|(vpn, page)| page.vpn() == vpn));
        if range.is_empty() {
            return Ok(());
        }
        if self.overlaps(range) {
            return Err(VmError::AlreadyMapped);
        }
        for page in pages {
            self.pages.insert(page.vpn(), page.clone());
        }
        Ok(())
    }

    /// 移除并返回包含 `vaddr` 的页的描述符，由调用方负责写回与释放
    pub fn remove(&mut self, vaddr: Vaddr) -> Option<Arc<Page>> {
        self.pages.remove(&Vpn::from_addr_floor(vaddr))
    }

    /// 范围内是否已有任何描述符
    pub fn overlaps(&self, range: &VpnRange) -> bool {
        self.pages.range(range.start()..range.end()).next().is_some()
    }

    /// 取出全部描述符（进程退出时使用）
    pub fn drain(&mut self) -> Vec<Arc<Page>> {
        core::mem::take(&mut self.pages).into_values().collect()
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 按虚拟页号顺序迭代描述符
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.pages.values()
    }
}
