//! 内存空间模块
//!
//! 本模块定义了进程地址空间的相关结构：页描述符、补充页表、
//! 内存映射文件记录，以及在它们之上实现的缺页处理与 mmap/munmap。

mod fault;
mod mmap_file;
mod page;
mod space;
mod spt;

pub use fault::{FaultOutcome, PageFault};
pub use mmap_file::{MapId, MmapFile};
pub use page::{FileBacking, Page, PageKind};
pub use space::{AddressSpace, Pid};
pub use spt::SupplementalPageTable;

pub(crate) use page::Residency;
