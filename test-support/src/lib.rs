//! 测试支持 crate
//!
//! 为虚拟内存核心的各个外部协作者提供 Mock 实现：
//! 物理内存、页表、文件以及交换设备。

#![no_std]

extern crate alloc;

pub mod mock;
