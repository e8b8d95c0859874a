/// 基础测试模块
/// 测试分配、retain/release、访问和析构函数的正确性

use crate::{AllocError, Ref, TrackingMemory};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 测试1: 分配后计数为 1，长度正确
#[test]
fn test_allocate_starts_with_one_owner() {
    let block = Ref::allocate(512).unwrap();

    assert_eq!(block.count(), 1);
    assert_eq!(block.len(), 512);
    assert!(!block.is_empty());
}

/// 测试2: 负载以零填充
#[test]
fn test_payload_is_zero_filled() {
    let block = Ref::allocate(128).unwrap();

    let payload = unsafe { std::slice::from_raw_parts(block.access().as_ptr(), block.len()) };
    assert!(payload.iter().all(|&b| b == 0));
}

/// 测试3: 负载按 16 字节对齐
#[test]
fn test_payload_alignment() {
    for size in [0, 1, 7, 16, 33, 4096] {
        let block = Ref::allocate(size).unwrap();
        assert_eq!(block.access().as_ptr() as usize % 16, 0, "size {size}");
    }
}

/// 测试4: 写入标记后再次访问能读回，地址稳定
#[test]
fn test_access_round_trip_marker() {
    let block = Ref::allocate(64).unwrap();

    let first = block.access();
    unsafe { first.cast::<u64>().as_ptr().write(0xDEAD_BEEF_CAFE_F00D) };

    let second = block.access();
    assert_eq!(first, second);
    assert_eq!(unsafe { second.cast::<u64>().as_ptr().read() }, 0xDEAD_BEEF_CAFE_F00D);
}

/// 测试5: retain 增加计数，release 减少计数
#[test]
fn test_retain_release_adjust_count() {
    let block = Ref::allocate(8).unwrap();

    let second = block.retain();
    let third = second.clone();
    assert_eq!(block.count(), 3);
    assert!(Ref::ptr_eq(&block, &third));

    second.release();
    assert_eq!(block.count(), 2);

    drop(third);
    assert_eq!(block.count(), 1);
}

/// 测试6: 析构函数在最后一次 release 时恰好运行一次
#[test]
fn test_destructor_runs_once_on_last_release() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    let block = Ref::allocate_with_destructor(512, move |_: &mut [u8]| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let other = block.retain();
    block.release();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    other.release();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 测试7: 析构函数收到的地址与 access 返回的地址一致
#[test]
fn test_destructor_receives_payload_address() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();

    let block = Ref::allocate_with_destructor(256, move |payload: &mut [u8]| {
        seen_clone.store(payload.as_mut_ptr() as usize, Ordering::SeqCst);
        assert_eq!(payload.len(), 256);
    })
    .unwrap();

    let address = block.access().as_ptr() as usize;
    block.release();

    assert_eq!(seen.load(Ordering::SeqCst), address);
}

/// 测试8: 析构函数能看到拥有者写入的内容
#[test]
fn test_destructor_observes_payload_contents() {
    let sum = Arc::new(AtomicUsize::new(0));
    let sum_clone = sum.clone();

    let block = Ref::allocate_with_destructor(4, move |payload: &mut [u8]| {
        let total = payload.iter().map(|&b| b as usize).sum();
        sum_clone.store(total, Ordering::SeqCst);
    })
    .unwrap();

    unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), block.access().as_ptr(), 4) };
    drop(block);

    assert_eq!(sum.load(Ordering::SeqCst), 10);
}

/// 测试9: 从 TrackingMemory 分配，释放后全部归还
#[test]
fn test_allocate_in_returns_memory() {
    let memory = TrackingMemory::new();

    let block = Ref::allocate_in(1000, memory.clone()).unwrap();
    // 头部和负载各一次分配
    assert_eq!(memory.live_allocations(), 2);
    assert!(memory.live_bytes() >= 1000);

    let copy = block.retain();
    drop(block);
    assert_eq!(memory.live_allocations(), 2);

    drop(copy);
    assert_eq!(memory.live_allocations(), 0);
    assert_eq!(memory.live_bytes(), 0);
}

/// 测试10: 内存来源耗尽时报告 OutOfMemory
#[test]
fn test_out_of_memory_is_reported() {
    let memory = TrackingMemory::with_limit(2);

    let first = Ref::allocate_in(16, memory.clone()).unwrap();
    let second = Ref::allocate_in(16, memory.clone());

    assert_eq!(second.unwrap_err(), AllocError::OutOfMemory { size: 16 });
    assert_eq!(memory.failed_allocations(), 1);
    drop(first);
    assert_eq!(memory.live_allocations(), 0);
}

/// 测试11: 构建器组合内存来源和析构函数
#[test]
fn test_builder_with_memory_and_destructor() {
    let memory = TrackingMemory::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();

    let block = Ref::builder(24)
        .memory(memory.clone())
        .destructor(move |_: &mut [u8]| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        })
        .allocate()
        .unwrap();

    assert_eq!(block.len(), 24);
    drop(block);

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(memory.live_allocations(), 0);
}
