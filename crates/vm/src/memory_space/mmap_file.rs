//! mmap 文件映射

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::address::{AlignOps, PageNum, UsizeConvert, Vaddr, Vpn, VpnRange};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::memory_space::{AddressSpace, FileBacking, Page};

/// 映射 ID，在进程内单调递增
pub type MapId = usize;

/// 文件映射信息
///
/// 映射持有重新打开的文件句柄和它创建的全部描述符，拆除时负责回收它们。
pub struct MmapFile {
    id: MapId,
    /// 重新打开的文件，与调用者的句柄相互独立
    file: Arc<dyn MmFile>,
    pages: Vec<Arc<Page>>,
}

impl MmapFile {
    /// 映射 ID
    pub fn id(&self) -> MapId {
        self.id
    }

    /// 映射的起始地址
    pub fn start(&self) -> Vaddr {
        self.pages
            .first()
            .map(|page| page.upage())
            .unwrap_or_default()
    }

    /// 映射的文件长度（字节）
    pub fn len(&self) -> usize {
        self.file.len()
    }

    /// 映射是否不含任何页
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 映射覆盖的页
    pub fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }
}

// 手动实现 Debug，因为 dyn MmFile 没有实现 Debug
impl core::fmt::Debug for MmapFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmapFile")
            .field("id", &self.id)
            .field("file", &"<dyn MmFile>")
            .field("start", &self.start())
            .field("pages", &self.pages.len())
            .finish()
    }
}

/// 进程的映射表
#[derive(Debug)]
pub(crate) struct MmapTable {
    next_id: MapId,
    maps: BTreeMap<MapId, MmapFile>,
}

impl MmapTable {
    pub(crate) fn new(first_id: MapId) -> Self {
        Self {
            next_id: first_id,
            maps: BTreeMap::new(),
        }
    }

    pub(crate) fn ids(&self) -> Vec<MapId> {
        self.maps.keys().copied().collect()
    }
}

impl AddressSpace {
    /// 把 `file` 的全部内容映射到 `addr`，返回映射 ID
    ///
    /// 文件被切分为页大小的块，最后一块的尾部补零。所有页一次性注册：
    /// 任意一页与已有描述符冲突时整体失败，不留下任何描述符。
    pub fn mmap(&self, file: &Arc<dyn MmFile>, addr: usize) -> VmResult<MapId> {
        if addr == 0 {
            return Err(VmError::InvalidAddress);
        }
        if !addr.is_page_aligned() {
            return Err(VmError::Misaligned);
        }
        let len = file.len();
        if len == 0 {
            return Err(VmError::EmptyFile);
        }
        let page_count = len.div_ceil(PAGE_SIZE);
        let end = page_count
            .checked_mul(PAGE_SIZE)
            .and_then(|size| addr.checked_add(size))
            .ok_or(VmError::InvalidAddress)?;
        let config = self.vm.config();
        if !config.is_user_vaddr(addr) || end > config.user_space_end {
            return Err(VmError::InvalidAddress);
        }

        let file = file.reopen().map_err(|_| VmError::Io)?;

        let mut mmaps = self.mmaps.lock();
        let id = mmaps.next_id;
        let range =
            VpnRange::from_start_len(Vpn::from_addr_floor(Vaddr::from_usize(addr)), page_count);
        let mut pages = Vec::with_capacity(page_count);
        for (i, vpn) in range.iter().enumerate() {
            let offset = i * PAGE_SIZE;
            let read_bytes = (len - offset).min(PAGE_SIZE);
            let backing = FileBacking::new(file.clone(), offset, read_bytes, PAGE_SIZE - read_bytes)?;
            pages.push(Arc::new(Page::mapped(vpn, backing, id)));
        }

        if let Err(e) = self.spt.lock().insert_all(&range, &pages) {
            log::debug!("pid {}: mmap at {:#x} overlaps an existing page", self.pid, addr);
            return Err(e);
        }

        mmaps.next_id += 1;
        mmaps.maps.insert(id, MmapFile { id, file, pages });
        log::debug!(
            "pid {}: mmap {} at {:#x}, {} bytes in {} pages",
            self.pid,
            id,
            addr,
            len,
            page_count
        );
        Ok(id)
    }

    /// 拆除映射 `id`：被修改过的驻留页写回文件，然后释放描述符、帧与文件句柄
    ///
    /// 写回失败时仍会拆除整个映射，并返回 [`VmError::Io`]。
    pub fn munmap(&self, id: MapId) -> VmResult<()> {
        let map = self.mmaps.lock().maps.remove(&id).ok_or(VmError::BadMapId)?;

        let mut result = Ok(());
        for page in &map.pages {
            self.spt.lock().remove(page.upage());
            if let Err(e) = self.unload_page(page, true) {
                log::error!(
                    "pid {}: write-back of {:?} for mmap {} failed",
                    self.pid,
                    page.vpn(),
                    id
                );
                result = Err(e);
            }
        }
        log::debug!("pid {}: munmap {} ({} pages)", self.pid, id, map.pages.len());
        result
    }

    /// 当前有效的映射 ID
    pub fn mappings(&self) -> Vec<MapId> {
        self.mmaps.lock().ids()
    }
}
