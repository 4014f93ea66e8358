//! 虚拟内存错误类型
//!
//! [`VmError`] 描述的都是“对进程致命”的情况：出错的进程被终止，内核继续运行。
//! 对系统致命的情况（交换区耗尽、换入未分配的槽、置换写回失败）没有对应的错误值，
//! 它们在记录日志后直接 panic。

use crate::page_table::PagingError;

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 地址不在合法的用户地址范围内 (-EFAULT)
    InvalidAddress,
    /// 地址没有对应的页描述符，且不属于栈增长 (-EFAULT)
    NotMapped,
    /// 向只读页写入 (-EACCES)
    WriteToReadOnly,
    /// 页已经存在描述符或映射 (-EEXIST)
    AlreadyMapped,
    /// 映射长度为 0 的文件 (-EINVAL)
    EmptyFile,
    /// 地址未按页对齐 (-EINVAL)
    Misaligned,
    /// 不存在的映射 ID (-EINVAL)
    BadMapId,
    /// 参数不满足约束 (-EINVAL)
    InvalidArgument,
    /// 文件 I/O 失败或读取长度不足 (-EIO)
    Io,
    /// 没有可用或可置换的物理帧 (-ENOMEM)
    OutOfMemory,
    /// 地址转换原语报告的错误
    Paging(PagingError),
}

impl VmError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            VmError::Io => -5,
            VmError::OutOfMemory => -12,
            VmError::WriteToReadOnly => -13,
            VmError::InvalidAddress | VmError::NotMapped => -14,
            VmError::AlreadyMapped => -17,
            VmError::EmptyFile
            | VmError::Misaligned
            | VmError::BadMapId
            | VmError::InvalidArgument => -22,
            VmError::Paging(e) => match e {
                PagingError::AlreadyMapped => -17,
                PagingError::NotMapped => -14,
            },
        }
    }
}

impl From<PagingError> for VmError {
    fn from(e: PagingError) -> Self {
        VmError::Paging(e)
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
