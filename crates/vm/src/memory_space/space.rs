//! 进程地址空间
//!
//! [`AddressSpace`] 把一个进程的硬件页表、补充页表与映射文件表放在一起，
//! 并通过共享的 [`VmSystem`] 使用帧表与交换区。
//!
//! 补充页表的锁只用来查找与增删描述符，持有它时不会调用帧表，
//! 因此不会与另一线程上的置换形成加锁环。

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;

use crate::address::{AlignOps, PageNum, UsizeConvert, Vaddr, Vpn, VpnRange};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::frame_allocator::frame_bytes;
use crate::frame_table::LoadClaim;
use crate::memory_space::mmap_file::MmapTable;
use crate::memory_space::{FileBacking, Page, PageKind, SupplementalPageTable};
use crate::page_table::{PageTable, PagingError, UniversalPTEFlag};
use crate::vm_system::VmSystem;

/// 进程标识
pub type Pid = usize;

/// 进程地址空间
pub struct AddressSpace {
    pub(super) pid: Pid,
    pub(super) vm: Arc<VmSystem>,
    pub(super) page_table: Arc<dyn PageTable>,
    pub(super) spt: SpinLock<SupplementalPageTable>,
    pub(super) mmaps: SpinLock<MmapTable>,
}

impl AddressSpace {
    pub(crate) fn new(pid: Pid, vm: Arc<VmSystem>, page_table: Arc<dyn PageTable>) -> Self {
        let first_map_id = vm.config().first_map_id;
        Self {
            pid,
            vm,
            page_table,
            spt: SpinLock::new(SupplementalPageTable::new()),
            mmaps: SpinLock::new(MmapTable::new(first_map_id)),
        }
    }

    /// 所属进程
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 进程的硬件页表
    pub fn page_table(&self) -> &Arc<dyn PageTable> {
        &self.page_table
    }

    /// 查找包含 `addr` 的页的描述符
    pub fn lookup(&self, addr: usize) -> Option<Arc<Page>> {
        self.spt.lock().lookup(Vaddr::from_usize(addr))
    }

    /// 已注册的描述符数量
    pub fn page_count(&self) -> usize {
        self.spt.lock().len()
    }

    /// 当前驻留的页数
    pub fn resident_pages(&self) -> usize {
        self.spt.lock().iter().filter(|page| page.is_resident()).count()
    }

    /// 注册一个由程序装载器产生的可执行文件页
    pub fn register_binary_segment(&self, page: Page) -> VmResult<Arc<Page>> {
        if !matches!(page.kind(), PageKind::Binary(_)) {
            return Err(VmError::InvalidArgument);
        }
        if !self.vm.config().is_user_vaddr(page.upage().as_usize()) {
            return Err(VmError::InvalidAddress);
        }
        let page = Arc::new(page);
        self.spt.lock().insert(page.clone())?;
        Ok(page)
    }

    /// 把可执行文件的一个段拆成逐页的描述符并注册
    ///
    /// 段从文件 `offset` 处开始，映射到 `upage`：先是 `read_bytes` 字节文件内容，
    /// 再是 `zero_bytes` 字节的零。二者之和必须是页大小的整数倍。
    /// 任意一页冲突时整段失败，不留下任何描述符。
    pub fn load_segment(
        &self,
        file: &Arc<dyn MmFile>,
        offset: usize,
        upage: usize,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> VmResult<()> {
        if !upage.is_page_aligned() || !offset.is_page_aligned() {
            return Err(VmError::Misaligned);
        }
        let total = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::InvalidArgument)?;
        if !total.is_page_aligned() {
            return Err(VmError::InvalidArgument);
        }
        let end = upage.checked_add(total).ok_or(VmError::InvalidAddress)?;
        let config = self.vm.config();
        if total > 0 && (!config.is_user_vaddr(upage) || end > config.user_space_end) {
            return Err(VmError::InvalidAddress);
        }

        let range = VpnRange::from_start_len(
            Vpn::from_addr_floor(Vaddr::from_usize(upage)),
            total / PAGE_SIZE,
        );
        let mut pages = Vec::with_capacity(range.len());
        let mut remaining = read_bytes;
        for (i, vpn) in range.iter().enumerate() {
            let page_read = remaining.min(PAGE_SIZE);
            let backing = FileBacking::new(
                file.clone(),
                offset + i * PAGE_SIZE,
                page_read,
                PAGE_SIZE - page_read,
            )?;
            pages.push(Arc::new(Page::binary(vpn, writable, backing)));
            remaining -= page_read;
        }

        self.spt.lock().insert_all(&range, &pages)?;
        log::debug!(
            "pid {}: segment at {:#x}, {} pages, writable={}",
            self.pid,
            upage,
            pages.len(),
            writable
        );
        Ok(())
    }

    /// 建立初始用户栈：注册并装入用户空间最高的一页，返回初始栈指针
    pub fn setup_stack(&self) -> VmResult<usize> {
        let top = self.vm.config().user_space_end;
        let vpn = Vpn::from_addr_floor(Vaddr::from_usize(top - PAGE_SIZE));
        let page = Arc::new(Page::anonymous(vpn, true));
        self.spt.lock().insert(page.clone())?;
        self.load_page(&page)?;
        Ok(top)
    }

    /// 检查 `addr` 是否是合法的、已注册描述符的用户地址
    pub fn check_address(&self, addr: usize) -> VmResult<Arc<Page>> {
        if !self.vm.config().is_user_vaddr(addr) {
            return Err(VmError::InvalidAddress);
        }
        self.lookup(addr).ok_or(VmError::NotMapped)
    }

    /// 检查用户缓冲区 `[addr, addr + len)`，并把它的每一页装入内存
    ///
    /// 必要时按栈增长规则创建栈页；`to_write` 为真时每一页都必须可写。
    /// 返回之后这些页仍可能被置换，访问它们应使用 [`Self::copy_from_user`]
    /// 与 [`Self::copy_to_user`]。
    pub fn validate_user_buffer(
        &self,
        addr: usize,
        len: usize,
        to_write: bool,
        stack_pointer: usize,
    ) -> VmResult<()> {
        if len == 0 {
            return Ok(());
        }
        let end = addr.checked_add(len).ok_or(VmError::InvalidAddress)?;
        let mut page_addr = addr.align_down_to_page();
        while page_addr < end {
            self.fault_in(page_addr.max(addr), to_write, stack_pointer)?;
            page_addr += PAGE_SIZE;
        }
        Ok(())
    }

    /// 检查以 NUL 结尾的用户字符串，返回不含结尾 NUL 的长度
    pub fn validate_user_str(&self, addr: usize, stack_pointer: usize) -> VmResult<usize> {
        let mut len = 0;
        loop {
            let cur = addr.checked_add(len).ok_or(VmError::InvalidAddress)?;
            let offset = cur.page_offset();
            let found = self.access_user_page(cur, false, stack_pointer, |frame| {
                frame[offset..].iter().position(|&b| b == 0)
            })?;
            match found {
                Some(pos) => return Ok(len + pos),
                None => len += PAGE_SIZE - offset,
            }
        }
    }

    /// 从用户地址 `addr` 读取 `buf.len()` 字节
    pub fn copy_from_user(&self, addr: usize, buf: &mut [u8], stack_pointer: usize) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr.checked_add(done).ok_or(VmError::InvalidAddress)?;
            let offset = cur.page_offset();
            let take = (buf.len() - done).min(PAGE_SIZE - offset);
            let dst = &mut buf[done..done + take];
            self.access_user_page(cur, false, stack_pointer, |frame| {
                dst.copy_from_slice(&frame[offset..offset + take]);
            })?;
            done += take;
        }
        Ok(())
    }

    /// 向用户地址 `addr` 写入 `buf`，被写入的页会被标记为 dirty
    pub fn copy_to_user(&self, addr: usize, buf: &[u8], stack_pointer: usize) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr.checked_add(done).ok_or(VmError::InvalidAddress)?;
            let offset = cur.page_offset();
            let take = (buf.len() - done).min(PAGE_SIZE - offset);
            let src = &buf[done..done + take];
            self.access_user_page(cur, true, stack_pointer, |frame| {
                frame[offset..offset + take].copy_from_slice(src);
            })?;
            done += take;
        }
        Ok(())
    }

    /// 在帧表锁内访问 `addr` 所在页的帧内容，页不驻留时先装入
    ///
    /// 访问会像硬件那样置位 accessed（写访问还会置位 dirty），
    /// 这样内核代为写入的内容在置换时不会被丢弃。
    fn access_user_page<R>(
        &self,
        addr: usize,
        is_write: bool,
        stack_pointer: usize,
        mut f: impl FnMut(&mut [u8]) -> R,
    ) -> VmResult<R> {
        let mut touched = UniversalPTEFlag::ACCESSED;
        if is_write {
            touched |= UniversalPTEFlag::DIRTY;
        }
        loop {
            let page = self.fault_in(addr, is_write, stack_pointer)?;
            let result = self.vm.frame_table().with_resident(&page, |frame| {
                if let Ok((_, flags)) = self.page_table.walk(page.vpn()) {
                    let _ = self.page_table.update_flags(page.vpn(), flags | touched);
                }
                f(frame)
            });
            // 装入之后、访问之前被置换时重试
            if let Some(result) = result {
                return Ok(result);
            }
        }
    }

    /// 把页装入一个新分配的帧并安装映射
    ///
    /// 页已驻留时什么也不做；另一线程正在装载或写回该页时等待。
    /// 描述符已被注销（例如另一线程刚刚 munmap）时返回 [`VmError::NotMapped`]。
    pub(super) fn load_page(&self, page: &Arc<Page>) -> VmResult<()> {
        let frames = self.vm.frame_table();
        loop {
            match frames.begin_load(page) {
                LoadClaim::Resident => return Ok(()),
                LoadClaim::Busy => core::hint::spin_loop(),
                LoadClaim::Removed => return Err(VmError::NotMapped),
                LoadClaim::Claimed => break,
            }
        }

        // 已有转换说明页表与描述符不一致，在读取交换槽或文件之前拒绝
        if self.page_table.walk(page.vpn()).is_ok() {
            log::warn!("pid {}: {:?} is already mapped", self.pid, page.vpn());
            frames.cancel_load(page);
            return Err(PagingError::AlreadyMapped.into());
        }

        let slot = page.swap_slot();
        let zero = slot.is_none() && page.backing().is_none();
        let ppn = match frames.allocate(self.pid, &self.page_table, page, zero) {
            Ok(ppn) => ppn,
            Err(e) => {
                frames.cancel_load(page);
                return Err(e);
            }
        };

        // SAFETY: 帧已被钉住且尚未映射，只有当前线程访问
        let frame = unsafe { frame_bytes(ppn) };
        if let Some(slot) = slot {
            self.vm.swap().swap_in(slot, frame);
        } else if let Some(backing) = page.backing()
            && let Err(e) = backing.load(frame)
        {
            frames.abort_load(page, ppn, None);
            return Err(e);
        }

        if let Err(e) = frames.install(page, ppn) {
            log::warn!(
                "pid {}: cannot install {:?} -> {:?}: {:?}",
                self.pid,
                page.vpn(),
                ppn,
                e
            );
            // 换入已释放原来的槽，帧中是内容的唯一副本
            let restored = slot.map(|_| self.vm.swap().swap_out(frame));
            frames.abort_load(page, ppn, restored);
            return Err(e.into());
        }
        Ok(())
    }

    /// 卸载一页：清除映射、按需写回映射文件、释放帧与交换槽
    ///
    /// 只有映射文件页会被写回，且只在 `flush` 为真并且页被修改过时。
    pub(super) fn unload_page(&self, page: &Page, flush: bool) -> VmResult<()> {
        let frames = self.vm.frame_table();
        let mut result = Ok(());
        if let Some((ppn, dirty)) = frames.detach(page) {
            if flush
                && dirty
                && let PageKind::MappedFile { backing, .. } = page.kind()
            {
                // SAFETY: 帧已被钉住且映射已清除
                let frame = unsafe { frame_bytes(ppn) };
                result = backing.write_back(frame);
            }
            frames.free(page, ppn);
        }
        if let Some(slot) = page.take_swap_slot() {
            self.vm.swap().free(slot);
        }
        result
    }

    /// 销毁地址空间：拆除全部文件映射（写回被修改的页），
    /// 再释放其余描述符的帧与交换槽
    ///
    /// 可以重复调用；`Drop` 时会自动调用。
    pub fn destroy(&self) {
        let ids = self.mmaps.lock().ids();
        for id in ids {
            if let Err(e) = self.munmap(id) {
                log::warn!("pid {}: implicit munmap of {} failed: {:?}", self.pid, id, e);
            }
        }

        let pages = self.spt.lock().drain();
        if pages.is_empty() {
            return;
        }
        for page in &pages {
            // 非映射文件页不会被写回，不会出错
            let _ = self.unload_page(page, false);
        }
        log::debug!("pid {}: released {} pages", self.pid, pages.len());
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}
