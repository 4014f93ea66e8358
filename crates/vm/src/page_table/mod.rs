//! 页表模块
//!
//! 本模块定义了虚拟内存核心所依赖的地址转换原语：
//! 页表项标志 [`UniversalPTEFlag`]、错误类型 [`PagingError`] 以及每进程页表接口 [`PageTable`]。
mod table;

pub use table::*;

use bitflags::bitflags;

bitflags! {
    /// 架构无关的页表项标志
    ///
    /// `ACCESSED` 与 `DIRTY` 由硬件（或软件模拟）在访问时置位，
    /// 时钟算法与写回策略通过 [`PageTable::walk`] 读取它们。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UniversalPTEFlag: usize {
        /// 有效位
        const VALID = 1 << 0;
        /// 可读
        const READABLE = 1 << 1;
        /// 可写
        const WRITEABLE = 1 << 2;
        /// 用户态可访问
        const USER_ACCESSIBLE = 1 << 3;
        /// 自上次清除以来被访问过
        const ACCESSED = 1 << 4;
        /// 自安装以来被写过
        const DIRTY = 1 << 5;
    }
}

impl UniversalPTEFlag {
    /// 用户可读写页
    pub fn user_rw() -> Self {
        Self::VALID | Self::READABLE | Self::WRITEABLE | Self::USER_ACCESSIBLE
    }

    /// 用户只读页
    pub fn user_ro() -> Self {
        Self::VALID | Self::READABLE | Self::USER_ACCESSIBLE
    }

    /// 根据可写标志选择用户页权限
    pub fn user(writable: bool) -> Self {
        if writable {
            Self::user_rw()
        } else {
            Self::user_ro()
        }
    }
}

/// 分页操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;
