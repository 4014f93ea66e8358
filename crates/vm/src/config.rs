//! 虚拟内存配置
//!
//! 页大小等布局常量在编译期固定；与进程地址空间布局相关的参数
//! 由 [`VmConfig`] 在子系统初始化时给定。

/// 页大小
pub const PAGE_SIZE: usize = 4096;

/// 交换设备的扇区大小
pub const SECTOR_SIZE: usize = 512;

/// 一页占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 因致命缺页而被终止的进程的退出码
pub const FATAL_EXIT_STATUS: isize = -1;

/// 用户地址空间布局参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// 用户空间结束地址（不包含），同时也是用户栈顶
    pub user_space_end: usize,
    /// 用户栈最大大小（字节）
    pub max_stack_size: usize,
    /// 允许访问的、低于栈指针的字节数（例如 `PUSHA` 一次压入 32 字节）
    pub stack_slack: usize,
    /// 第一个映射 ID，更小的值保留
    pub first_map_id: usize,
}

impl VmConfig {
    /// 默认布局：3 GiB 用户空间，8 MiB 栈上限
    pub const fn new() -> Self {
        Self {
            user_space_end: 0xC000_0000,
            max_stack_size: 8 * 1024 * 1024,
            stack_slack: 32,
            first_map_id: 1,
        }
    }

    /// 栈能够增长到的最低地址
    pub fn stack_limit(&self) -> usize {
        self.user_space_end.saturating_sub(self.max_stack_size)
    }

    /// 地址是否落在合法的用户地址范围内（第 0 页不可访问）
    pub fn is_user_vaddr(&self, addr: usize) -> bool {
        addr >= PAGE_SIZE && addr < self.user_space_end
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = VmConfig::default();
        assert_eq!(config.stack_limit(), 0xC000_0000 - 0x80_0000);
        assert!(config.is_user_vaddr(0x0804_8000));
        assert!(!config.is_user_vaddr(0));
        assert!(!config.is_user_vaddr(PAGE_SIZE - 1));
        assert!(!config.is_user_vaddr(0xC000_0000));
        assert_eq!(SECTORS_PER_PAGE, 8);
    }
}
