//! 页描述符
//!
//! 每个进程已知的虚拟页对应一个 [`Page`]。描述符的不可变部分（页号、权限、
//! 后备来源）在创建时确定；可变部分 `PageState`（是否驻留、交换槽）
//! 只在持有帧表锁时修改，这样缺页处理与另一线程上的置换不会看到撕裂的状态。

use alloc::sync::Arc;
use sync::SpinLock;

use crate::address::{PageNum, Ppn, Vaddr, Vpn};
use crate::config::PAGE_SIZE;
use crate::error::{VmError, VmResult};
use crate::file::MmFile;
use crate::memory_space::MapId;
use crate::swap::SwapSlot;

/// 文件后备信息
///
/// 不变式：`read_bytes + zero_bytes == PAGE_SIZE`
#[derive(Clone)]
pub struct FileBacking {
    /// 文件句柄
    pub file: Arc<dyn MmFile>,
    /// 页内容在文件中的起始偏移
    pub offset: usize,
    /// 从文件读取的字节数
    pub read_bytes: usize,
    /// 读取之后补零的字节数
    pub zero_bytes: usize,
}

impl FileBacking {
    /// 创建文件后备信息，检查读取与补零长度之和恰为一页
    pub fn new(
        file: Arc<dyn MmFile>,
        offset: usize,
        read_bytes: usize,
        zero_bytes: usize,
    ) -> VmResult<Self> {
        if read_bytes.checked_add(zero_bytes) != Some(PAGE_SIZE) {
            return Err(VmError::InvalidArgument);
        }
        Ok(Self {
            file,
            offset,
            read_bytes,
            zero_bytes,
        })
    }

    /// 把页内容装入帧：读取 `read_bytes` 字节，其余补零
    pub fn load(&self, frame: &mut [u8]) -> VmResult<()> {
        let actual_read = self
            .file
            .read_at(self.offset, &mut frame[..self.read_bytes])
            .map_err(|_| VmError::Io)?;
        if actual_read != self.read_bytes {
            log::warn!(
                "Partial read at offset {}: expected {}, got {}",
                self.offset,
                self.read_bytes,
                actual_read
            );
            return Err(VmError::Io);
        }
        frame[self.read_bytes..].fill(0);
        Ok(())
    }

    /// 把帧中属于文件的部分写回文件
    pub fn write_back(&self, frame: &[u8]) -> VmResult<()> {
        let actual_written = self
            .file
            .write_at(self.offset, &frame[..self.read_bytes])
            .map_err(|_| VmError::Io)?;
        if actual_written != self.read_bytes {
            log::error!(
                "Partial write at offset {}: expected {}, got {}",
                self.offset,
                self.read_bytes,
                actual_written
            );
            return Err(VmError::Io);
        }
        Ok(())
    }
}

// 手动实现 Debug，因为 dyn MmFile 没有实现 Debug
impl core::fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileBacking")
            .field("file", &"<dyn MmFile>")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish()
    }
}

/// 页的后备来源
#[derive(Debug, Clone)]
pub enum PageKind {
    /// 从可执行文件按需装载，尾部补零；被修改后改由交换区支撑
    Binary(FileBacking),
    /// 从映射文件按需装载，被修改后写回该文件
    MappedFile {
        /// 文件后备信息
        backing: FileBacking,
        /// 所属映射
        map_id: MapId,
    },
    /// 只由交换区支撑，首次访问时为全零
    Anonymous,
}

/// 页的驻留状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Residency {
    /// 没有物理帧
    Absent,
    /// 某个线程正在为它装载内容，帧已被钉住
    Loading,
    /// 已驻留在给定物理帧中，且映射已安装
    Resident(Ppn),
    /// 映射已清除，内容正在被写回，帧已被钉住
    Evicting,
    /// 描述符已从补充页表中注销，不会再被装载
    Removed,
}

/// 页描述符的可变状态
#[derive(Debug)]
pub(crate) struct PageState {
    pub(crate) residency: Residency,
    /// 内容被换出时所在的槽
    pub(crate) swap_slot: Option<SwapSlot>,
    /// 当前内容只存在于内存或交换区中，不能再从文件重新读取
    pub(crate) swap_backed: bool,
}

/// 页描述符
#[derive(Debug)]
pub struct Page {
    vpn: Vpn,
    writable: bool,
    kind: PageKind,
    pub(crate) state: SpinLock<PageState>,
}

impl Page {
    fn with_kind(vpn: Vpn, writable: bool, kind: PageKind) -> Self {
        Self {
            vpn,
            writable,
            kind,
            state: SpinLock::new(PageState {
                residency: Residency::Absent,
                swap_slot: None,
                swap_backed: false,
            }),
        }
    }

    /// 可执行文件中的页
    pub fn binary(vpn: Vpn, writable: bool, backing: FileBacking) -> Self {
        Self::with_kind(vpn, writable, PageKind::Binary(backing))
    }

    /// 映射文件中的页（总是可写）
    pub fn mapped(vpn: Vpn, backing: FileBacking, map_id: MapId) -> Self {
        Self::with_kind(vpn, true, PageKind::MappedFile { backing, map_id })
    }

    /// 匿名页
    pub fn anonymous(vpn: Vpn, writable: bool) -> Self {
        Self::with_kind(vpn, writable, PageKind::Anonymous)
    }

    /// 虚拟页号
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 页起始虚拟地址
    pub fn upage(&self) -> Vaddr {
        self.vpn.start_addr()
    }

    /// 是否可写
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 后备来源
    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    /// 文件后备信息（匿名页为 None）
    pub fn backing(&self) -> Option<&FileBacking> {
        match &self.kind {
            PageKind::Binary(backing) | PageKind::MappedFile { backing, .. } => Some(backing),
            PageKind::Anonymous => None,
        }
    }

    /// 是否已驻留
    pub fn is_resident(&self) -> bool {
        matches!(self.state.lock().residency, Residency::Resident(_))
    }

    /// 驻留时所在的物理帧
    pub fn frame(&self) -> Option<Ppn> {
        match self.state.lock().residency {
            Residency::Resident(ppn) => Some(ppn),
            _ => None,
        }
    }

    /// 换出时所在的交换槽
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.state.lock().swap_slot
    }

    pub(crate) fn take_swap_slot(&self) -> Option<SwapSlot> {
        self.state.lock().swap_slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mocks::{mock_file, pattern};
    use alloc::vec;

    #[test]
    fn test_backing_lengths_must_cover_one_page() {
        let (_file, handle) = mock_file(pattern(100, 0));
        assert!(FileBacking::new(handle.clone(), 0, 100, PAGE_SIZE - 100).is_ok());
        assert_eq!(
            FileBacking::new(handle.clone(), 0, 100, 100).map(|_| ()),
            Err(VmError::InvalidArgument)
        );
        assert_eq!(
            FileBacking::new(handle, 0, usize::MAX, 1).map(|_| ()),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn test_load_zero_fills_tail_and_rejects_short_read() {
        let data = pattern(PAGE_SIZE + 300, 2);
        let (_file, handle) = mock_file(data.clone());
        let mut frame = vec![0xffu8; PAGE_SIZE];

        let tail = FileBacking::new(handle.clone(), PAGE_SIZE, 300, PAGE_SIZE - 300).unwrap();
        tail.load(&mut frame).unwrap();
        assert_eq!(&frame[..300], &data[PAGE_SIZE..]);
        assert!(frame[300..].iter().all(|&b| b == 0));

        // 文件比描述符记录的短
        let short = FileBacking::new(handle, PAGE_SIZE, 400, PAGE_SIZE - 400).unwrap();
        assert_eq!(short.load(&mut frame), Err(VmError::Io));
    }

    #[test]
    fn test_write_back_only_touches_file_bytes() {
        let (file, handle) = mock_file(pattern(200, 4));
        let backing = FileBacking::new(handle, 0, 200, PAGE_SIZE - 200).unwrap();
        backing.write_back(&vec![9u8; PAGE_SIZE]).unwrap();
        assert_eq!(file.contents(), vec![9u8; 200]);
    }

    #[test]
    fn test_mapped_pages_are_writable() {
        let (_file, handle) = mock_file(pattern(10, 0));
        let backing = FileBacking::new(handle, 0, 10, PAGE_SIZE - 10).unwrap();
        let page = Page::mapped(Vpn(4), backing, 1);
        assert!(page.writable());
        assert!(!page.is_resident());
        assert_eq!(page.upage(), Vpn(4).start_addr());
        assert!(Page::anonymous(Vpn(4), false).backing().is_none());
    }
}
