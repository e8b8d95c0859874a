use crate::block::Destructor;
use crate::memory::MemorySource;
use crate::sync::AtomicUsize;
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

#[cfg(feature = "cycle-guard")]
use crate::links::LinkList;

/// Alignment of every payload, matching the strictest fundamental alignment
/// (`max_align_t`) on mainstream targets.
/// 所有负载的对齐值，与主流平台上最严格的基本对齐（`max_align_t`）一致。
pub(crate) const PAYLOAD_ALIGN: usize = 16;

/// Ownership counts above this abort the process instead of wrapping.
/// 所有权计数超过此值时中止进程，而不是回绕。
pub(crate) const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Bookkeeping for one block.
///
/// Header and payload are two acquisitions from `memory`. The payload goes
/// back at destruction; the header stays while anything still pins it.
/// An empty payload acquires nothing and points at an aligned dangling address.
///
/// 一个块的簿记信息。
/// 头部和负载是从 `memory` 获得的两次分配。负载在销毁时归还；
/// 只要仍有东西钉住头部，头部就保留。
pub(crate) struct BlockHeader<M: MemorySource> {
    /// Ownership units outstanding. The 1 -> 0 transition destroys the payload.
    /// 未归还的所有权单位数。从 1 到 0 的转换会销毁负载。
    pub(crate) strong: AtomicUsize,

    /// Pins on the header itself: one shared by all owners, one per live link
    /// node naming this block as its child, and one per cycle search
    /// currently standing on it. The header and its link chain are freed
    /// when this reaches zero.
    /// 对头部本身的钉住：所有拥有者共享一个，每个指向此块的存活链接节点一个，
    /// 以及每个正在经过此块的环搜索一个。
    #[cfg(feature = "cycle-guard")]
    pub(crate) weak: AtomicUsize,

    /// Open accesses (open without a matching close).
    #[cfg(feature = "borrow-count")]
    pub(crate) borrows: AtomicUsize,

    /// Taken exactly once, by the thread that drops the count to zero.
    pub(crate) destructor: UnsafeCell<Option<Box<dyn Destructor>>>,

    /// Outgoing parent -> child edges.
    #[cfg(feature = "cycle-guard")]
    pub(crate) links: LinkList<M>,

    pub(crate) memory: M,
    pub(crate) payload: NonNull<u8>,
    pub(crate) payload_layout: Layout,
}

impl<M: MemorySource> BlockHeader<M> {
    /// Acquire a zero-filled payload of `len` bytes.
    ///
    /// `None` when the source is dry or `len` cannot be laid out at all.
    pub(crate) fn acquire_payload(memory: &M, len: usize) -> Option<(NonNull<u8>, Layout)> {
        let layout = Layout::from_size_align(len, PAYLOAD_ALIGN).ok()?;
        if len == 0 {
            // SAFETY: a non-zero address, aligned for the payload, never dereferenced.
            let dangling = unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(PAYLOAD_ALIGN)) };
            return Some((dangling, layout));
        }
        let payload = memory.acquire(layout)?;
        // SAFETY: freshly acquired for `layout`.
        unsafe { payload.as_ptr().write_bytes(0, len) };
        Some((payload, layout))
    }

    /// Return the payload to the source.
    ///
    /// # Safety
    ///
    /// Called once, after the last access to the payload.
    pub(crate) unsafe fn release_payload(&self) {
        if self.payload_layout.size() != 0 {
            unsafe { self.memory.release(self.payload, self.payload_layout) }
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.payload_layout.size()
    }
}
