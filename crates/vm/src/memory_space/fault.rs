//! 缺页处理
//!
//! 查找描述符 → 分配帧（必要时置换）→ 装载内容 → 安装映射。
//! 没有描述符的地址只有在落入栈增长区域时才合法，此时创建一个新的匿名页。

use alloc::sync::Arc;

use crate::address::{PageNum, UsizeConvert, Vaddr, Vpn};
use crate::config::FATAL_EXIT_STATUS;
use crate::error::{VmError, VmResult};
use crate::memory_space::{AddressSpace, Page};

/// 一次缺页的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// 触发缺页的地址
    pub addr: usize,
    /// 是否为写访问
    pub is_write: bool,
    /// 是否发生在用户态
    pub is_user: bool,
    /// 缺页时的用户栈指针
    pub stack_pointer: usize,
}

/// 缺页处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// 页已装入（或本来就已驻留）
    Resolved,
    /// 栈增长了一页
    StackGrown,
    /// 对进程致命，进程应以 [`FATAL_EXIT_STATUS`] 终止
    Fatal(VmError),
}

impl FaultOutcome {
    /// 是否需要终止进程
    pub fn is_fatal(&self) -> bool {
        matches!(self, FaultOutcome::Fatal(_))
    }

    /// 致命时进程的退出码
    pub fn exit_status(&self) -> Option<isize> {
        self.is_fatal().then_some(FATAL_EXIT_STATUS)
    }
}

impl AddressSpace {
    /// 处理缺页
    ///
    /// 对已驻留的页重复处理是无害的：不做任何 I/O，也不改变状态。
    pub fn resolve_fault(&self, fault: PageFault) -> FaultOutcome {
        match self.resolve(fault.addr, fault.is_write, fault.stack_pointer) {
            Ok((_, false)) => FaultOutcome::Resolved,
            Ok((_, true)) => FaultOutcome::StackGrown,
            Err(e) => {
                log::warn!(
                    "pid {}: fatal {} page fault at {:#x} ({}): {:?}",
                    self.pid,
                    if fault.is_user { "user" } else { "kernel" },
                    fault.addr,
                    if fault.is_write { "write" } else { "read" },
                    e
                );
                FaultOutcome::Fatal(e)
            }
        }
    }

    /// 保证 `addr` 所在的页已驻留，返回它的描述符
    pub(super) fn fault_in(
        &self,
        addr: usize,
        is_write: bool,
        stack_pointer: usize,
    ) -> VmResult<Arc<Page>> {
        self.resolve(addr, is_write, stack_pointer)
            .map(|(page, _)| page)
    }

    /// 返回驻留后的描述符，以及是否因此增长了栈
    fn resolve(
        &self,
        addr: usize,
        is_write: bool,
        stack_pointer: usize,
    ) -> VmResult<(Arc<Page>, bool)> {
        if !self.vm.config().is_user_vaddr(addr) {
            return Err(VmError::InvalidAddress);
        }

        if let Some(page) = self.lookup(addr) {
            if is_write && !page.writable() {
                return Err(VmError::WriteToReadOnly);
            }
            self.load_page(&page)?;
            return Ok((page, false));
        }

        if !self.is_stack_access(addr, stack_pointer) {
            return Err(VmError::NotMapped);
        }
        let page = self.grow_stack(addr)?;
        Ok((page, true))
    }

    /// `addr` 是否落在允许的栈增长区域内
    ///
    /// 既不能低于栈指针之下 `stack_slack` 字节，也不能超出栈大小上限。
    fn is_stack_access(&self, addr: usize, stack_pointer: usize) -> bool {
        let config = self.vm.config();
        addr >= stack_pointer.saturating_sub(config.stack_slack) && addr >= config.stack_limit()
    }

    fn grow_stack(&self, addr: usize) -> VmResult<Arc<Page>> {
        let vpn = Vpn::from_addr_floor(Vaddr::from_usize(addr));
        let page = {
            let mut spt = self.spt.lock();
            match spt.lookup(Vaddr::from_usize(addr)) {
                // 另一个线程刚刚创建了这一页
                Some(page) => page,
                None => {
                    let page = Arc::new(Page::anonymous(vpn, true));
                    spt.insert(page.clone())?;
                    page
                }
            }
        };
        log::debug!("pid {}: stack grown to {:?}", self.pid, vpn);
        self.load_page(&page)?;
        Ok(page)
    }
}
