use crate::sync::{Arc, Mutex};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// The primitive every block and link node is carved from.
///
/// Each block keeps its own clone of the source it was allocated from and
/// hands every byte back to that same clone.
///
/// # Safety
///
/// `acquire` must return memory valid for reads and writes of `layout`
/// (honoring its alignment) until it is passed back to `release` with the
/// same layout. Clones must share one underlying pool.
///
/// 所有块和链接节点的底层内存来源。
/// 每个块都保存一份分配它的来源的克隆，并将所有字节归还给同一个克隆。
pub unsafe trait MemorySource: Clone + Send + Sync + 'static {
    /// Acquire `layout.size()` bytes, or `None` when exhausted.
    /// `layout.size()` is never zero.
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return memory obtained from [`acquire`](Self::acquire).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `acquire` on this source (or a clone) with the
    /// same `layout`, and must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

unsafe impl MemorySource for SystemMemory {
    #[inline]
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: callers never pass a zero-sized layout.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

#[derive(Debug, Default)]
struct TrackingState {
    live_allocations: usize,
    live_bytes: usize,
    total_allocations: usize,
    failed_allocations: usize,
    limit: Option<usize>,
}

/// A diagnostic source that counts what is outstanding.
///
/// Wraps [`SystemMemory`] and records live allocations and bytes, which makes
/// leaks (a block or link chain never returned) visible to tests. An optional
/// limit on the number of successful acquisitions turns it into a source
/// that runs dry on demand.
///
/// 诊断用内存来源：统计尚未归还的分配数与字节数。
/// 可选的分配次数上限可以用来模拟内存耗尽。
///
/// # Example
/// ```
/// use refc::{Ref, TrackingMemory};
///
/// let memory = TrackingMemory::new();
/// let block = Ref::allocate_in(64, memory.clone()).unwrap();
/// // header and payload
/// assert_eq!(memory.live_allocations(), 2);
/// drop(block);
/// assert_eq!(memory.live_allocations(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct TrackingMemory {
    state: Arc<Mutex<TrackingState>>,
}

impl TrackingMemory {
    /// Create an unlimited tracking source.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackingState::default())),
        }
    }

    /// Create a source that fails every acquisition after the first `limit`.
    pub fn with_limit(limit: usize) -> Self {
        let memory = Self::new();
        memory.set_limit(Some(limit));
        memory
    }

    /// Change the acquisition limit. The limit counts successful acquisitions
    /// over the source's whole lifetime, not live ones.
    pub fn set_limit(&self, limit: Option<usize>) {
        self.state.lock().limit = limit;
    }

    /// Number of acquisitions not yet released.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations
    }

    /// Number of bytes not yet released.
    pub fn live_bytes(&self) -> usize {
        self.state.lock().live_bytes
    }

    /// Number of successful acquisitions so far.
    pub fn total_allocations(&self) -> usize {
        self.state.lock().total_allocations
    }

    /// Number of acquisitions refused because of the limit or the system allocator.
    pub fn failed_allocations(&self) -> usize {
        self.state.lock().failed_allocations
    }
}

impl Default for TrackingMemory {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl MemorySource for TrackingMemory {
    fn acquire(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.limit.is_some_and(|limit| state.total_allocations >= limit) {
            state.failed_allocations += 1;
            return None;
        }
        match SystemMemory.acquire(layout) {
            Some(ptr) => {
                state.live_allocations += 1;
                state.live_bytes += layout.size();
                state.total_allocations += 1;
                Some(ptr)
            }
            None => {
                state.failed_allocations += 1;
                None
            }
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.live_allocations > 0, "release without matching acquire");
            state.live_allocations -= 1;
            state.live_bytes -= layout.size();
        }
        unsafe { SystemMemory.release(ptr, layout) }
    }
}
