//! 同步原语
//!
//! 向虚拟内存子系统提供自旋锁。
//!
//! 锁的外壳（守卫、`Deref`、`try_lock` 等）由 `lock_api` 提供，
//! 本 crate 只实现底层的 [`RawSpinLock`]。
//!
//! 注意：这里的锁只在短临界区内持有。需要阻塞的磁盘 I/O 必须在释放锁之后进行，
//! 调用方通过“钉住”（pin）对象来保证 I/O 期间的一致性。

#![no_std]

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::RawSpinLock;
pub use spin_lock::{SpinLock, SpinLockGuard};
