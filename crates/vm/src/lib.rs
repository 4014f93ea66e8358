//! 按需调页虚拟内存子系统
//!
//! 提供补充页表、帧表与时钟置换、缺页处理、内存映射文件以及交换区管理。
//!
//! # 组成
//!
//! - [`SwapStore`]: 以位图管理块设备上的交换槽，每槽恰好容纳一页
//! - [`SupplementalPageTable`]: 每进程的页描述符集合，回答“这一页由什么支撑、是否驻留”
//! - [`FrameTable`]: 全局物理帧池，时钟（二次机会）算法选择牺牲帧并写回
//! - [`AddressSpace::resolve_fault`]: 查找 → 分配（必要时置换）→ 装载内容 → 安装映射
//! - [`AddressSpace::mmap`] / [`AddressSpace::munmap`]: 文件映射的建立与拆除
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与外部协作者解耦：
//! - [`ArchMmOps`]: 物理地址到内核虚拟地址的转换
//! - [`PageTable`]: 地址转换原语（安装、清除、查询 accessed/dirty 位）
//! - [`FrameSource`]: 物理帧来源
//! - [`MmFile`]: 文件能力句柄
//! - [`BlockDevice`]: 交换设备
//!
//! 使用前必须调用 [`register_arch_ops`] 注册实现，
//! 然后用 [`VmSystem::new`] 构造子系统。

#![no_std]

extern crate alloc;

mod arch_ops;
mod config;
mod error;
mod file;
mod vm_system;

pub mod address;
pub mod frame_allocator;
pub mod frame_table;
pub mod memory_space;
pub mod page_table;
pub mod swap;

#[cfg(test)]
mod tests;

pub use arch_ops::{arch_ops, register_arch_ops, ArchMmOps};
pub use config::{VmConfig, FATAL_EXIT_STATUS, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
pub use error::{VmError, VmResult};
pub use file::MmFile;
pub use vm_system::VmSystem;

// Re-export 常用类型
pub use address::{AlignOps, PageNum, Paddr, Ppn, UsizeConvert, Vaddr, Vpn, VpnRange};
pub use frame_allocator::{FrameAllocator, FrameSource};
pub use frame_table::{FrameStats, FrameTable};
pub use memory_space::{
    AddressSpace, FaultOutcome, FileBacking, MapId, MmapFile, Page, PageFault, PageKind, Pid,
    SupplementalPageTable,
};
pub use page_table::{PageTable, PagingError, PagingResult, UniversalPTEFlag};
pub use swap::{BlockDevice, SwapSlot, SwapStore};
