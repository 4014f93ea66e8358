//! Mock 实现模块
//!
//! 这里的类型只依赖 `sync`，不依赖 `vm`（避免循环依赖）。
//! `vm` crate 在 `cfg(test)` 下为这些类型实现其 trait
//! （例如 `ArchMmOps` / `PageTable` / `MmFile` / `BlockDevice`）。

pub mod device;
pub mod fs;
pub mod mm;
