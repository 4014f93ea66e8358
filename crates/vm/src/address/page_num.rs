//! 页码抽象模块
//!
//! 此模块定义了表示页码 (Page Number) 的 Trait 和具体的页码类型 (Ppn, Vpn)，
//! 以及用于处理连续页码的范围结构 (PageNumRange)。

use crate::address::{AlignOps, Paddr, UsizeConvert, Vaddr};
use crate::config::PAGE_SIZE;

/// 表示一个页码的 Trait。所有页码类型 (如 Ppn 和 Vpn) 必须实现此 Trait。
pub trait PageNum: UsizeConvert + PartialEq + PartialOrd + Eq + Ord {
    /// 此页码类型关联的地址类型（例如 Ppn 关联 Paddr，Vpn 关联 Vaddr）。
    type TAddress: AlignOps;

    /// 将页码增加 1。
    fn step(&mut self) {
        *self = Self::from_usize(self.as_usize() + 1);
    }

    /// 将地址转换为页码 (向下取整，即包含该地址的页)。
    fn from_addr_floor(addr: Self::TAddress) -> Self {
        Self::from_usize(addr.align_down_to_page().as_usize() / PAGE_SIZE)
    }

    /// 获取该页码对应的起始地址。
    fn start_addr(self) -> Self::TAddress {
        Self::TAddress::from_usize(self.as_usize() * PAGE_SIZE)
    }
}

macro_rules! impl_page_num {
    ($name:ident, $addr:ty) => {
        impl UsizeConvert for $name {
            fn from_usize(value: usize) -> Self {
                Self(value)
            }

            fn as_usize(&self) -> usize {
                self.0
            }
        }

        impl PageNum for $name {
            type TAddress = $addr;
        }

        impl core::ops::Add<usize> for $name {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

/// 物理页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ppn(pub usize);

/// 虚拟页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vpn(pub usize);

impl_page_num!(Ppn, Paddr);
impl_page_num!(Vpn, Vaddr);

/// 连续页码范围 `[start, end)`
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PageNumRange<T: PageNum> {
    start: T,
    end: T,
}

impl<T: PageNum> PageNumRange<T> {
    /// 创建范围
    pub fn new(start: T, end: T) -> Self {
        debug_assert!(start <= end, "PageNumRange: start > end");
        Self { start, end }
    }

    /// 从起始页码和长度创建范围
    pub fn from_start_len(start: T, len: usize) -> Self {
        Self::new(start, T::from_usize(start.as_usize() + len))
    }

    /// 起始页码
    pub fn start(&self) -> T {
        self.start
    }

    /// 结束页码（不包含）
    pub fn end(&self) -> T {
        self.end
    }

    /// 页数
    pub fn len(&self) -> usize {
        self.end.as_usize() - self.start.as_usize()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 迭代范围内的页码
    pub fn iter(&self) -> PageNumRangeIterator<T> {
        PageNumRangeIterator {
            current: self.start,
            end: self.end,
        }
    }
}

/// 页码范围的迭代器
pub struct PageNumRangeIterator<T: PageNum> {
    current: T,
    end: T,
}

impl<T: PageNum> Iterator for PageNumRangeIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }
        let result = self.current;
        self.current.step(); // 步进到下一页
        Some(result)
    }
}

/// 虚拟页码范围的类型别名
pub type VpnRange = PageNumRange<Vpn>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_page_num_start_addr() {
        assert_eq!(Vpn(1).start_addr().as_usize(), 4096);
        assert_eq!(Ppn(3).start_addr().as_usize(), 3 * 4096);
    }

    #[test]
    fn test_page_num_from_addr_floor() {
        assert_eq!(Vpn::from_addr_floor(Vaddr::from_usize(4096)), Vpn(1));
        assert_eq!(Vpn::from_addr_floor(Vaddr::from_usize(8191)), Vpn(1));
    }

    #[test]
    fn test_range_iter() {
        let range = VpnRange::from_start_len(Vpn(10), 3);
        assert_eq!(range.end(), Vpn(13));
        assert_eq!(range.len(), 3);
        let pages: Vec<_> = range.iter().collect();
        assert_eq!(pages, alloc::vec![Vpn(10), Vpn(11), Vpn(12)]);
        assert!(VpnRange::new(Vpn(4), Vpn(4)).iter().next().is_none());
    }
}
