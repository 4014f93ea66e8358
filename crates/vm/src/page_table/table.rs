//! 每进程页表接口
//!
//! ## 设计要点
//!
//! - `PageTable` 由内核按架构实现（例如不同 MMU、不同页表格式）。
//! - 虚拟内存核心只依赖该 trait，从而实现“调页逻辑”与“页表硬件细节”的解耦。
//! - 置换可能在另一个线程上清除某进程的映射，因此所有方法都以 `&self` 调用，
//!   实现方自行保证内部同步。
//!
//! TLB 刷新属于实现细节：`unmap` 与 `update_flags` 返回前，
//! 旧的转换必须已经对所有 CPU 失效。

use super::{PagingResult, UniversalPTEFlag};
use crate::address::{Ppn, Vpn};

/// 页表接口
///
/// 此 trait 定义了地址转换原语：安装、清除、查询与更新单个 4K 页的映射。
pub trait PageTable: Send + Sync {
    /// 映射虚拟页到物理页
    ///
    /// 若该虚拟页已有映射，返回 [`super::PagingError::AlreadyMapped`]。
    fn map(&self, vpn: Vpn, ppn: Ppn, flags: UniversalPTEFlag) -> PagingResult<()>;

    /// 解除映射
    fn unmap(&self, vpn: Vpn) -> PagingResult<()>;

    /// 遍历页表获取映射信息
    fn walk(&self, vpn: Vpn) -> PagingResult<(Ppn, UniversalPTEFlag)>;

    /// 更新映射标志
    fn update_flags(&self, vpn: Vpn, flags: UniversalPTEFlag) -> PagingResult<()>;

    /// 查询 accessed 位
    fn is_accessed(&self, vpn: Vpn) -> bool {
        self.walk(vpn)
            .map(|(_, flags)| flags.contains(UniversalPTEFlag::ACCESSED))
            .unwrap_or(false)
    }

    /// 清除 accessed 位
    fn clear_accessed(&self, vpn: Vpn) -> PagingResult<()> {
        let (_, flags) = self.walk(vpn)?;
        self.update_flags(vpn, flags - UniversalPTEFlag::ACCESSED)
    }

    /// 查询 dirty 位
    fn is_dirty(&self, vpn: Vpn) -> bool {
        self.walk(vpn)
            .map(|(_, flags)| flags.contains(UniversalPTEFlag::DIRTY))
            .unwrap_or(false)
    }
}
