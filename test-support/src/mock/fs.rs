//! 文件相关操作的 Mock 实现

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use sync::SpinLock;

/// 多个句柄共享的“inode”
struct MockInode {
    data: SpinLock<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    opens: AtomicUsize,
    fail_io: AtomicBool,
}

/// Mock 文件句柄
///
/// `reopen` 得到的新句柄与原句柄共享同一份数据和计数器，
/// 但各自独立地被打开和关闭。
pub struct MockFile {
    inode: Arc<MockInode>,
}

impl MockFile {
    /// 以给定内容创建文件
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inode: Arc::new(MockInode {
                data: SpinLock::new(data),
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                opens: AtomicUsize::new(1),
                fail_io: AtomicBool::new(false),
            }),
        }
    }

    /// 从 `offset` 处读取，返回实际读取的字节数；注入故障时返回 None
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Option<usize> {
        if self.inode.fail_io.load(Ordering::Relaxed) {
            return None;
        }
        self.inode.reads.fetch_add(1, Ordering::Relaxed);
        let data = self.inode.data.lock();
        if offset >= data.len() {
            return Some(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Some(n)
    }

    /// 向 `offset` 处写入（不扩展文件），返回实际写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Option<usize> {
        if self.inode.fail_io.load(Ordering::Relaxed) {
            return None;
        }
        self.inode.writes.fetch_add(1, Ordering::Relaxed);
        let mut data = self.inode.data.lock();
        if offset >= data.len() {
            return Some(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Some(n)
    }

    /// 重新打开同一个文件
    pub fn reopen(&self) -> Self {
        self.inode.opens.fetch_add(1, Ordering::Relaxed);
        Self {
            inode: self.inode.clone(),
        }
    }

    /// 文件长度
    pub fn len(&self) -> usize {
        self.inode.data.lock().len()
    }

    /// 文件是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 文件内容快照
    pub fn contents(&self) -> Vec<u8> {
        self.inode.data.lock().clone()
    }

    /// 读调用次数
    pub fn read_count(&self) -> usize {
        self.inode.reads.load(Ordering::Relaxed)
    }

    /// 写调用次数
    pub fn write_count(&self) -> usize {
        self.inode.writes.load(Ordering::Relaxed)
    }

    /// 当前仍处于打开状态的句柄数量
    pub fn open_handles(&self) -> usize {
        self.inode.opens.load(Ordering::Relaxed)
    }

    /// 注入 I/O 故障
    pub fn set_fail_io(&self, fail: bool) {
        self.inode.fail_io.store(fail, Ordering::Relaxed);
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        self.inode.opens.fetch_sub(1, Ordering::Relaxed);
    }
}
