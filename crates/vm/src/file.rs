//! 文件映射接口 trait 定义

use alloc::sync::Arc;

/// 可映射到内存的文件句柄
///
/// 此 trait 抽象了按需调页所需的最小文件接口。错误以负的 errno 表示。
/// 句柄被 drop 即视为关闭。
pub trait MmFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 重新打开同一个文件，得到独立的句柄
    fn reopen(&self) -> Result<Arc<dyn MmFile>, isize>;

    /// 文件长度（字节）
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
