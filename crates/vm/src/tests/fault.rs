use alloc::vec;

use super::mocks::{fault, mock_file, pattern, Harness, CODE_BASE, USER_TOP};
use crate::address::{Ppn, Vpn};
use crate::config::{VmConfig, FATAL_EXIT_STATUS, PAGE_SIZE};
use crate::error::VmError;
use crate::memory_space::FaultOutcome;
use crate::page_table::{PageTable, PagingError, UniversalPTEFlag};

#[test]
fn test_three_page_segment_with_one_frame() {
    let h = Harness::new(1, 8);
    let (space, page_table) = h.space(1);

    let data = pattern(2 * PAGE_SIZE + PAGE_SIZE / 2, 3);
    let (file, handle) = mock_file(data.clone());
    space
        .load_segment(&handle, 0, CODE_BASE, data.len(), 3 * PAGE_SIZE - data.len(), false)
        .unwrap();
    assert_eq!(space.page_count(), 3);
    assert_eq!(file.read_count(), 0);

    for i in 0..3 {
        let addr = CODE_BASE + i * PAGE_SIZE;
        assert_eq!(
            space.resolve_fault(fault(addr, false, USER_TOP)),
            FaultOutcome::Resolved
        );
        for j in 0..3 {
            let page = space.lookup(CODE_BASE + j * PAGE_SIZE).unwrap();
            assert_eq!(page.is_resident(), i == j);
        }
        assert_eq!(page_table.len(), 1);
    }

    let mut page2 = vec![0u8; PAGE_SIZE];
    space
        .copy_from_user(CODE_BASE + 2 * PAGE_SIZE, &mut page2, USER_TOP)
        .unwrap();
    assert_eq!(&page2[..PAGE_SIZE / 2], &data[2 * PAGE_SIZE..]);
    assert!(page2[PAGE_SIZE / 2..].iter().all(|&b| b == 0));

    let stats = h.vm.frame_table().stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.evictions, 2);
    // 未修改的可执行页直接丢弃
    assert_eq!(h.vm.swap().used(), 0);
    assert_eq!(h.swap_device.write_count(), 0);

    // 再次访问第 0 页需要重新从文件读取
    let mut page0 = vec![0u8; 16];
    space.copy_from_user(CODE_BASE, &mut page0, USER_TOP).unwrap();
    assert_eq!(&page0[..], &data[..16]);
    assert_eq!(file.read_count(), 4);
}

#[test]
fn test_repeated_fault_is_idempotent() {
    let h = Harness::new(2, 4);
    let (space, page_table) = h.space(1);
    let (file, handle) = mock_file(pattern(PAGE_SIZE, 9));
    space
        .load_segment(&handle, 0, CODE_BASE, PAGE_SIZE, 0, true)
        .unwrap();

    let addr = CODE_BASE + 0x123;
    assert_eq!(
        space.resolve_fault(fault(addr, false, USER_TOP)),
        FaultOutcome::Resolved
    );
    let mapping = page_table.get(CODE_BASE / PAGE_SIZE);
    let reads = file.read_count();
    let stats = h.vm.frame_table().stats();

    assert_eq!(
        space.resolve_fault(fault(addr, true, USER_TOP)),
        FaultOutcome::Resolved
    );
    assert_eq!(page_table.get(CODE_BASE / PAGE_SIZE), mapping);
    assert_eq!(file.read_count(), reads);
    assert_eq!(h.vm.frame_table().stats(), stats);
}

#[test]
fn test_fatal_faults() {
    let h = Harness::new(2, 4);
    let (space, _page_table) = h.space(1);
    let (_file, handle) = mock_file(pattern(PAGE_SIZE, 1));
    space
        .load_segment(&handle, 0, CODE_BASE, PAGE_SIZE, 0, false)
        .unwrap();

    let outcome = space.resolve_fault(fault(CODE_BASE, true, USER_TOP));
    assert_eq!(outcome, FaultOutcome::Fatal(VmError::WriteToReadOnly));
    assert_eq!(outcome.exit_status(), Some(FATAL_EXIT_STATUS));
    assert!(!space.lookup(CODE_BASE).unwrap().is_resident());

    assert_eq!(
        space.resolve_fault(fault(0, false, USER_TOP)),
        FaultOutcome::Fatal(VmError::InvalidAddress)
    );
    assert_eq!(
        space.resolve_fault(fault(USER_TOP, false, USER_TOP)),
        FaultOutcome::Fatal(VmError::InvalidAddress)
    );
    assert_eq!(
        space.resolve_fault(fault(0x2000_0000, false, USER_TOP)),
        FaultOutcome::Fatal(VmError::NotMapped)
    );
    assert_eq!(FaultOutcome::Resolved.exit_status(), None);
    assert_eq!(h.vm.frame_table().stats().in_use, 0);
}

#[test]
fn test_short_read_is_fatal_to_process() {
    let h = Harness::new(2, 4);
    let (space, page_table) = h.space(1);
    let (file, handle) = mock_file(pattern(PAGE_SIZE, 1));
    space
        .load_segment(&handle, 0, CODE_BASE, PAGE_SIZE, 0, false)
        .unwrap();

    file.set_fail_io(true);
    assert_eq!(
        space.resolve_fault(fault(CODE_BASE, false, USER_TOP)),
        FaultOutcome::Fatal(VmError::Io)
    );
    assert!(page_table.is_empty());
    assert_eq!(h.vm.frame_table().stats().in_use, 0);

    file.set_fail_io(false);
    assert_eq!(
        space.resolve_fault(fault(CODE_BASE, false, USER_TOP)),
        FaultOutcome::Resolved
    );
}

#[test]
fn test_stack_growth_bound() {
    let config = VmConfig {
        max_stack_size: 16 * PAGE_SIZE,
        ..VmConfig::default()
    };
    let h = Harness::with_config(4, 8, config);
    let (space, _page_table) = h.space(1);

    let sp = space.setup_stack().unwrap();
    assert_eq!(sp, USER_TOP);
    assert!(space.lookup(USER_TOP - 1).unwrap().is_resident());

    // 栈指针逐页下移，每次压栈都落在栈指针之下的新页
    for k in 1..16 {
        let sp = USER_TOP - k * PAGE_SIZE;
        assert_eq!(
            space.resolve_fault(fault(sp - 4, true, sp)),
            FaultOutcome::StackGrown,
            "page {} below the top",
            k
        );
    }
    assert_eq!(space.page_count(), 16);

    let sp = USER_TOP - 16 * PAGE_SIZE;
    assert_eq!(
        space.resolve_fault(fault(sp - 4, true, sp)),
        FaultOutcome::Fatal(VmError::NotMapped)
    );
    assert_eq!(space.page_count(), 16);
}

#[test]
fn test_stack_access_must_be_near_stack_pointer() {
    let h = Harness::new(4, 8);
    let (space, _page_table) = h.space(1);
    space.setup_stack().unwrap();

    let sp = USER_TOP - PAGE_SIZE;
    assert_eq!(
        space.resolve_fault(fault(sp - 64, true, sp)),
        FaultOutcome::Fatal(VmError::NotMapped)
    );
    assert_eq!(
        space.resolve_fault(fault(sp - 32, true, sp)),
        FaultOutcome::StackGrown
    );
    // 新页已注册，再次访问只是普通的缺页
    assert_eq!(
        space.resolve_fault(fault(sp - 64, true, sp)),
        FaultOutcome::Resolved
    );
}

#[test]
fn test_dirty_anonymous_page_survives_swap() {
    let h = Harness::new(1, 4);
    let (space, page_table) = h.space(1);
    let sp = space.setup_stack().unwrap();
    let msg = b"demand paging";

    space.copy_to_user(sp - 100, msg, sp).unwrap();
    let lower_sp = sp - PAGE_SIZE;
    assert_eq!(
        space.resolve_fault(fault(lower_sp - 4, true, lower_sp)),
        FaultOutcome::StackGrown
    );
    let top = space.lookup(sp - 100).unwrap();
    assert!(!top.is_resident());
    assert!(top.swap_slot().is_some());
    assert_eq!(h.vm.swap().used(), 1);

    let mut buf = [0u8; 13];
    space.copy_from_user(sp - 100, &mut buf, sp).unwrap();
    assert_eq!(&buf, msg);
    // 换入之后槽被释放
    assert_eq!(top.swap_slot(), None);
    assert_eq!(h.vm.swap().used(), 0);

    // 内容只剩这一份，即使没有再被修改也要重新换出
    assert!(!page_table.get((sp - 100) / PAGE_SIZE).is_some_and(|(_, bits)| {
        UniversalPTEFlag::from_bits_truncate(bits).contains(UniversalPTEFlag::DIRTY)
    }));
    assert_eq!(
        space.resolve_fault(fault(lower_sp - 4, false, lower_sp)),
        FaultOutcome::Resolved
    );
    assert_eq!(h.vm.swap().used(), 1);

    buf.fill(0);
    space.copy_from_user(sp - 100, &mut buf, sp).unwrap();
    assert_eq!(&buf, msg);
}

#[test]
fn test_existing_translation_is_fatal_and_keeps_swap_slot() {
    let h = Harness::new(1, 4);
    let (space, page_table) = h.space(1);
    let sp = space.setup_stack().unwrap();
    space.copy_to_user(sp - 8, b"swapped", sp).unwrap();
    let lower_sp = sp - PAGE_SIZE;
    assert_eq!(
        space.resolve_fault(fault(lower_sp - 4, true, lower_sp)),
        FaultOutcome::StackGrown
    );

    let top = space.lookup(sp - 8).unwrap();
    let slot = top.swap_slot().unwrap();
    assert!(h.vm.swap().is_allocated(slot));

    // 页表里已有一个描述符之外的转换
    let vpn = Vpn((sp - 8) / PAGE_SIZE);
    PageTable::map(&*page_table, vpn, Ppn(0x4242), UniversalPTEFlag::user_rw()).unwrap();
    let reads = h.swap_device.read_count();
    assert_eq!(
        space.resolve_fault(fault(sp - 8, false, lower_sp)),
        FaultOutcome::Fatal(VmError::Paging(PagingError::AlreadyMapped))
    );
    assert!(!top.is_resident());
    assert_eq!(top.swap_slot(), Some(slot));
    assert!(h.vm.swap().is_allocated(slot));
    assert_eq!(h.vm.swap().used(), 1);
    assert_eq!(h.swap_device.read_count(), reads);
    assert_eq!(h.vm.frame_table().stats().in_use, 1);

    // 另一个进程换出时拿不到仍被占用的槽
    let (other, _other_page_table) = h.space(2);
    let other_sp = other.setup_stack().unwrap();
    other.copy_to_user(other_sp - 8, b"other", other_sp).unwrap();
    space.resolve_fault(fault(lower_sp - 4, false, lower_sp));
    let other_top = other.lookup(other_sp - 8).unwrap();
    assert_eq!(h.vm.swap().used(), 2);
    assert_ne!(other_top.swap_slot(), Some(slot));

    // 去掉多余的转换后，原来的内容仍然可以换入
    PageTable::unmap(&*page_table, vpn).unwrap();
    let mut buf = [0u8; 7];
    space.copy_from_user(sp - 8, &mut buf, lower_sp).unwrap();
    assert_eq!(&buf, b"swapped");
    drop(space);
    let mut buf = [0u8; 5];
    other.copy_from_user(other_sp - 8, &mut buf, other_sp).unwrap();
    assert_eq!(&buf, b"other");
}

#[test]
fn test_destroy_releases_frames_and_swap() {
    let h = Harness::new(1, 4);
    let (space, page_table) = h.space(1);
    let sp = space.setup_stack().unwrap();
    space.copy_to_user(sp - 8, &[7u8; 8], sp).unwrap();
    let lower_sp = sp - PAGE_SIZE;
    space.resolve_fault(fault(lower_sp - 4, true, lower_sp));
    assert_eq!(h.vm.swap().used(), 1);

    space.destroy();
    assert_eq!(space.page_count(), 0);
    assert!(page_table.is_empty());
    assert_eq!(h.vm.frame_table().stats().in_use, 0);
    assert_eq!(h.vm.swap().used(), 0);

    // 重复销毁是无害的
    space.destroy();
}

#[test]
fn test_validate_user_buffer_and_str() {
    let h = Harness::new(2, 4);
    let (space, _page_table) = h.space(1);
    let sp = space.setup_stack().unwrap();

    let mut data = pattern(PAGE_SIZE + 10, 5);
    data[PAGE_SIZE + 5] = 0;
    let (_file, handle) = mock_file(data);
    space
        .load_segment(&handle, 0, CODE_BASE, PAGE_SIZE + 10, PAGE_SIZE - 10, false)
        .unwrap();

    // 字符串跨越页边界
    assert_eq!(space.validate_user_str(CODE_BASE + 100, sp), Ok(PAGE_SIZE - 95));
    assert_eq!(
        space.validate_user_buffer(CODE_BASE, 2 * PAGE_SIZE, false, sp),
        Ok(())
    );
    assert_eq!(
        space.validate_user_buffer(CODE_BASE, 16, true, sp),
        Err(VmError::WriteToReadOnly)
    );
    assert_eq!(
        space.validate_user_buffer(CODE_BASE + PAGE_SIZE, 2 * PAGE_SIZE, false, sp),
        Err(VmError::NotMapped)
    );
    assert_eq!(
        space.validate_user_buffer(usize::MAX - 4, 16, false, sp),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(space.validate_user_buffer(0, 0, false, sp), Ok(()));

    assert!(space.check_address(CODE_BASE + 8).is_ok());
    assert_eq!(
        space.check_address(0x10).map(|_| ()),
        Err(VmError::InvalidAddress)
    );
    assert_eq!(
        space.check_address(0x3000_0000).map(|_| ()),
        Err(VmError::NotMapped)
    );
}

#[test]
fn test_segment_registration_checks() {
    let h = Harness::new(2, 4);
    let (space, _page_table) = h.space(1);
    let (_file, handle) = mock_file(pattern(PAGE_SIZE, 1));

    assert_eq!(
        space.load_segment(&handle, 0, CODE_BASE + 1, PAGE_SIZE, 0, false),
        Err(VmError::Misaligned)
    );
    assert_eq!(
        space.load_segment(&handle, 0, CODE_BASE, 100, 100, false),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(
        space.load_segment(&handle, 0, 0, PAGE_SIZE, 0, false),
        Err(VmError::InvalidAddress)
    );

    space
        .load_segment(&handle, 0, CODE_BASE, PAGE_SIZE, PAGE_SIZE, false)
        .unwrap();
    assert_eq!(
        space.load_segment(&handle, 0, CODE_BASE + PAGE_SIZE, PAGE_SIZE, 0, true),
        Err(VmError::AlreadyMapped)
    );
    assert_eq!(space.page_count(), 2);
}
