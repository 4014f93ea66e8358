//! 地址模块
//!
//! 此模块提供了用于处理物理地址和虚拟地址，
//! 以及内存管理系统中的页码的抽象。
//!
//! # 地址类型
//!
//! - [`Paddr`] - 物理地址类型
//! - [`Vaddr`] - 虚拟地址类型
//!
//! # 页码
//!
//! - [`PageNum`] - 表示页码的 Trait
//! - [`Ppn`] - 物理页码（Physical Page Number）
//! - [`Vpn`] - 虚拟页码（Virtual Page Number）
//! - [`VpnRange`] - 虚拟页码范围
//!
//! # 操作
//!
//! - [`UsizeConvert`] - 在类型和 usize 之间进行转换
//! - [`AlignOps`] - 地址对齐操作
pub mod page_num;

pub use page_num::{PageNum, PageNumRange, Ppn, Vpn, VpnRange};

use crate::config::PAGE_SIZE;

/// 在类型和 usize 之间进行转换
pub trait UsizeConvert: Copy {
    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;
    /// 转换为 usize
    fn as_usize(&self) -> usize;
}

/// 地址对齐操作
pub trait AlignOps: UsizeConvert {
    /// 页内偏移
    fn page_offset(self) -> usize {
        self.as_usize() & (PAGE_SIZE - 1)
    }

    /// 是否按页对齐
    fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// 向下对齐到页边界
    fn align_down_to_page(self) -> Self {
        Self::from_usize(self.as_usize() & !(PAGE_SIZE - 1))
    }
}

macro_rules! impl_address {
    ($name:ident) => {
        impl UsizeConvert for $name {
            fn from_usize(value: usize) -> Self {
                Self(value)
            }

            fn as_usize(&self) -> usize {
                self.0
            }
        }

        impl AlignOps for $name {}

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Paddr(usize);

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vaddr(usize);

impl_address!(Paddr);
impl_address!(Vaddr);

// 系统调用层传入的用户地址是裸 usize
impl UsizeConvert for usize {
    fn from_usize(value: usize) -> Self {
        value
    }

    fn as_usize(&self) -> usize {
        *self
    }
}

impl AlignOps for usize {}

impl Paddr {
    /// 通过内核直接映射区转换为虚拟地址
    pub fn to_vaddr(self) -> Vaddr {
        Vaddr(crate::arch_ops().paddr_to_vaddr(self.0))
    }
}

impl Vaddr {
    /// 作为可变裸指针
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}
