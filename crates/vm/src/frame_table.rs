//! 帧表与置换
//!
//! 全局的物理帧池。每个已分配给某个页描述符的帧在置换环（`slots`）中占一个槽，
//! 时钟指针（`hand`）在环上循环移动并跨调用保持位置。
//!
//! ## 时钟（二次机会）算法
//!
//! 检查指针所指的帧：若其页自上次扫描以来被访问过，清除 accessed 位并前进；
//! 否则选它作为牺牲帧并前进。一整圈之后所有 accessed 位都已被清除，
//! 因此最多 `2N` 步必然选出牺牲帧（被钉住的帧除外）。
//!
//! ## 加锁顺序
//!
//! 获取帧表锁 → 选出并钉住牺牲帧、清除其映射 → 释放帧表锁 →
//! 执行写回 I/O（内部获取文件系统或交换区的锁）→ 重新获取帧表锁完成状态转换。
//!
//! 页描述符的驻留状态只在持有帧表锁时修改（帧表锁在外，描述符状态锁在内），
//! 安装映射与标记驻留在同一个临界区内完成。

use alloc::boxed::Box;
use alloc::collections::btree_map::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use sync::SpinLock;

use crate::address::{Ppn, Vpn};
use crate::error::{VmError, VmResult};
use crate::frame_allocator::{clear_frame, frame_bytes, FrameSource};
use crate::memory_space::{Page, PageKind, Pid, Residency};
use crate::page_table::{PageTable, PagingError, PagingResult, UniversalPTEFlag};
use crate::swap::{SwapSlot, SwapStore};

/// 帧表中的一项
struct FrameEntry {
    ppn: Ppn,
    owner: Pid,
    /// 所属进程的页表，置换时用于查询 accessed/dirty 位并清除映射
    page_table: Arc<dyn PageTable>,
    page: Weak<Page>,
    /// 被钉住的帧正在装载或写回，不会被选为牺牲帧
    pinned: bool,
}

/// 被选中的牺牲帧
struct Victim {
    slot: usize,
    ppn: Ppn,
    /// 描述符已被销毁的帧为 None，直接回收即可
    page: Option<Arc<Page>>,
    dirty: bool,
}

/// 抢占装载权的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadClaim {
    /// 页已驻留，无需任何操作
    Resident,
    /// 另一个线程正在装载或写回该页
    Busy,
    /// 调用方获得了装载权，页处于 Loading 状态
    Claimed,
    /// 描述符已被注销，不能再装载
    Removed,
}

/// 帧表统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// 物理帧总数
    pub total: usize,
    /// 已分配给页描述符的帧数
    pub in_use: usize,
    /// 累计置换次数
    pub evictions: usize,
    /// 时钟指针累计移动的步数
    pub clock_steps: usize,
}

struct FrameTableInner {
    source: Box<dyn FrameSource>,
    /// 置换环
    slots: Vec<Option<FrameEntry>>,
    /// 物理页号到环中槽位的索引
    index: BTreeMap<Ppn, usize>,
    /// 时钟指针
    hand: usize,
    evictions: usize,
    clock_steps: usize,
}

impl FrameTableInner {
    fn insert(&mut self, entry: FrameEntry) {
        let ppn = entry.ppn;
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(ppn, slot);
    }

    fn entry_mut(&mut self, ppn: Ppn) -> Option<&mut FrameEntry> {
        let slot = *self.index.get(&ppn)?;
        self.slots[slot].as_mut()
    }

    fn remove(&mut self, ppn: Ppn) -> Option<FrameEntry> {
        let slot = self.index.remove(&ppn)?;
        self.slots[slot].take()
    }

    /// 用时钟算法选择并钉住牺牲帧，同时清除它的映射
    fn select_victim(&mut self) -> Option<Victim> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }

        for _ in 0..2 * n {
            let slot = self.hand;
            self.hand = (self.hand + 1) % n;
            self.clock_steps += 1;

            let Some(entry) = self.slots[slot].as_mut() else {
                continue;
            };
            if entry.pinned {
                continue;
            }

            let Some(page) = entry.page.upgrade() else {
                entry.pinned = true;
                return Some(Victim {
                    slot,
                    ppn: entry.ppn,
                    page: None,
                    dirty: false,
                });
            };

            let vpn = page.vpn();
            if entry.page_table.is_accessed(vpn) {
                // 二次机会
                let _ = entry.page_table.clear_accessed(vpn);
                continue;
            }

            entry.pinned = true;
            let dirty = entry.page_table.is_dirty(vpn);
            let _ = entry.page_table.unmap(vpn);
            page.state.lock().residency = Residency::Evicting;
            log::debug!(
                "frame: evicting {:?} of pid {} from {:?}",
                vpn,
                entry.owner,
                entry.ppn
            );
            return Some(Victim {
                slot,
                ppn: entry.ppn,
                page: Some(page),
                dirty,
            });
        }

        None
    }
}

/// 帧表
pub struct FrameTable {
    inner: SpinLock<FrameTableInner>,
    swap: Arc<SwapStore>,
}

impl FrameTable {
    /// 创建帧表，物理帧取自 `source`，匿名页与被修改的可执行页换出到 `swap`
    pub fn new(source: Box<dyn FrameSource>, swap: Arc<SwapStore>) -> Self {
        Self {
            inner: SpinLock::new(FrameTableInner {
                source,
                slots: Vec::new(),
                index: BTreeMap::new(),
                hand: 0,
                evictions: 0,
                clock_steps: 0,
            }),
            swap,
        }
    }

    /// 获取帧表的当前状态
    pub fn stats(&self) -> FrameStats {
        let inner = self.inner.lock();
        FrameStats {
            total: inner.source.total(),
            in_use: inner.index.len(),
            evictions: inner.evictions,
            clock_steps: inner.clock_steps,
        }
    }

    /// 列出所有已分配帧及其所属进程与虚拟页
    pub fn assigned_frames(&self) -> Vec<(Ppn, Pid, Option<Vpn>)> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .map(|entry| {
                (
                    entry.ppn,
                    entry.owner,
                    entry.page.upgrade().map(|page| page.vpn()),
                )
            })
            .collect()
    }

    /// 抢占页的装载权：`Absent` → `Loading`
    pub(crate) fn begin_load(&self, page: &Page) -> LoadClaim {
        let _inner = self.inner.lock();
        let mut state = page.state.lock();
        match state.residency {
            Residency::Resident(_) => LoadClaim::Resident,
            Residency::Loading | Residency::Evicting => LoadClaim::Busy,
            Residency::Removed => LoadClaim::Removed,
            Residency::Absent => {
                state.residency = Residency::Loading;
                LoadClaim::Claimed
            }
        }
    }

    /// 放弃尚未分配到帧的装载：`Loading` → `Absent`
    pub(crate) fn cancel_load(&self, page: &Page) {
        let _inner = self.inner.lock();
        page.state.lock().residency = Residency::Absent;
    }

    /// 为处于 Loading 状态的 `page` 分配一个被钉住的帧
    ///
    /// 有空闲帧时直接使用；否则按时钟算法置换一帧，并按描述符类型写回：
    /// - 映射文件页：被修改过则写回文件，不占用交换槽
    /// - 可执行文件页与匿名页：被修改过，或内容已经只存在于内存中，则换出到交换区
    /// - 其余情况直接丢弃
    ///
    /// 只有在所有帧都被钉住、无帧可置换时才返回 [`VmError::OutOfMemory`]。
    ///
    /// # Panics
    /// 写回 I/O 失败时 panic：此时页内容会被静默丢失，没有安全的恢复方式
    pub(crate) fn allocate(
        &self,
        owner: Pid,
        page_table: &Arc<dyn PageTable>,
        page: &Arc<Page>,
        zero: bool,
    ) -> VmResult<Ppn> {
        let new_entry = |ppn: Ppn| FrameEntry {
            ppn,
            owner,
            page_table: page_table.clone(),
            page: Arc::downgrade(page),
            pinned: true,
        };

        let mut inner = self.inner.lock();
        if let Some(ppn) = inner.source.alloc() {
            inner.insert(new_entry(ppn));
            drop(inner);
            if zero {
                clear_frame(ppn);
            }
            return Ok(ppn);
        }

        let Some(victim) = inner.select_victim() else {
            log::warn!("frame: no evictable frame for pid {}", owner);
            return Err(VmError::OutOfMemory);
        };
        drop(inner);

        let slot = victim
            .page
            .as_ref()
            .and_then(|victim_page| self.write_back(victim_page, victim.ppn, victim.dirty));

        let mut inner = self.inner.lock();
        if let Some(victim_page) = &victim.page {
            let mut state = victim_page.state.lock();
            if slot.is_some() {
                state.swap_slot = slot;
                state.swap_backed = true;
            }
            state.residency = Residency::Absent;
        }
        inner.evictions += 1;
        // 帧转交给新的所有者，物理页号与槽位不变
        inner.slots[victim.slot] = Some(new_entry(victim.ppn));
        drop(inner);

        if zero {
            clear_frame(victim.ppn);
        }
        Ok(victim.ppn)
    }

    /// 写回牺牲帧的内容，返回新分配的交换槽（如果换出了的话）
    fn write_back(&self, page: &Page, ppn: Ppn, dirty: bool) -> Option<SwapSlot> {
        // SAFETY: 帧已被钉住且映射已清除，没有其他访问者
        let frame = unsafe { frame_bytes(ppn) };
        match page.kind() {
            PageKind::MappedFile { backing, .. } => {
                if dirty && backing.write_back(frame).is_err() {
                    log::error!("frame: write-back of {:?} to its mapped file failed", page.vpn());
                    panic!("mmap write-back failed during eviction");
                }
                None
            }
            PageKind::Binary(_) | PageKind::Anonymous => {
                let swap_backed = page.state.lock().swap_backed;
                if dirty || swap_backed {
                    Some(self.swap.swap_out(frame))
                } else {
                    None
                }
            }
        }
    }

    /// 安装映射并标记驻留，二者在同一临界区内完成，同时解除钉住
    pub(crate) fn install(&self, page: &Page, ppn: Ppn) -> PagingResult<()> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entry_mut(ppn) else {
            return Err(PagingError::NotMapped);
        };
        entry
            .page_table
            .map(page.vpn(), ppn, UniversalPTEFlag::user(page.writable()))?;
        entry.pinned = false;
        let mut state = page.state.lock();
        state.residency = Residency::Resident(ppn);
        // 换入时槽已被释放
        state.swap_slot = None;
        Ok(())
    }

    /// 装载失败：归还帧并回到 `Absent`
    ///
    /// `swap_slot` 是页内容此后所在的槽。换入已经释放了原来的槽，
    /// 因此调用方要么重新换出并传入新槽，要么传入 None。
    pub(crate) fn abort_load(&self, page: &Page, ppn: Ppn, swap_slot: Option<SwapSlot>) {
        let mut inner = self.inner.lock();
        if inner.remove(ppn).is_some() {
            inner.source.dealloc(ppn);
        }
        let mut state = page.state.lock();
        state.residency = Residency::Absent;
        state.swap_slot = swap_slot;
    }

    /// 注销页描述符前把它从帧上摘下：钉住帧、读取 dirty 位并清除映射
    ///
    /// 页未驻留时直接标记为 `Removed` 并返回 None；页正在被装载或写回时等待其完成。
    /// 返回的帧必须随后交给 [`FrameTable::free`]。此后该页不能再被装载，
    /// 已经拿到描述符的缺页处理会得到 [`LoadClaim::Removed`]。
    pub(crate) fn detach(&self, page: &Page) -> Option<(Ppn, bool)> {
        loop {
            {
                let mut inner = self.inner.lock();
                let mut state = page.state.lock();
                match state.residency {
                    Residency::Absent => {
                        state.residency = Residency::Removed;
                        return None;
                    }
                    Residency::Removed => return None,
                    Residency::Resident(ppn) => {
                        let entry = inner.entry_mut(ppn)?;
                        entry.pinned = true;
                        let dirty = entry.page_table.is_dirty(page.vpn());
                        let _ = entry.page_table.unmap(page.vpn());
                        state.residency = Residency::Evicting;
                        return Some((ppn, dirty));
                    }
                    Residency::Loading | Residency::Evicting => {}
                }
            }
            core::hint::spin_loop();
        }
    }

    /// 把 [`FrameTable::detach`] 摘下的帧移出置换环并归还物理帧池，不做任何写回
    pub(crate) fn free(&self, page: &Page, ppn: Ppn) {
        let mut inner = self.inner.lock();
        if inner.remove(ppn).is_some() {
            inner.source.dealloc(ppn);
        }
        page.state.lock().residency = Residency::Removed;
    }

    /// 在帧表锁内访问驻留页的内容，页未驻留时返回 None
    pub(crate) fn with_resident<R>(&self, page: &Page, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let _inner = self.inner.lock();
        let Residency::Resident(ppn) = page.state.lock().residency else {
            return None;
        };
        // SAFETY: 持有帧表锁期间该帧不会被置换或释放
        Some(f(unsafe { frame_bytes(ppn) }))
    }
}
