//! 场景测试
//!
//! 以 `test-support` 中的 mock 作为协作者，端到端地驱动缺页处理、置换与 mmap。


mod fault;
