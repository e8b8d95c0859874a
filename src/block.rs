use crate::builder::BlockBuilder;
use crate::error::{AllocError, LinkError, UnlinkError};
use crate::guard::{ActiveGuard, EdgeGuard};
use crate::memory::{MemorySource, SystemMemory};
use crate::state::{BlockHeader, MAX_REFCOUNT};
use crate::sync::{fence, AtomicUsize, Ordering};
use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::slice;
use tracing::trace;

#[cfg(feature = "cycle-guard")]
use crate::links::LinkList;

/// Callback run once, when the last ownership unit of a block is released.
///
/// It receives exclusive access to the payload right before the memory goes
/// back to its source. Any `FnOnce(&mut [u8]) + Send` closure qualifies.
///
/// 当块的最后一个所有权单位被释放时运行一次的回调。
/// 它在内存归还之前获得对负载的独占访问。
pub trait Destructor: Send + 'static {
    fn destroy(self: Box<Self>, payload: &mut [u8]);
}

impl<F> Destructor for F
where
    F: FnOnce(&mut [u8]) + Send + 'static,
{
    #[inline]
    fn destroy(self: Box<Self>, payload: &mut [u8]) {
        (*self)(payload)
    }
}

/// One unit of ownership over a reference-counted block.
///
/// Every `Ref` value is exactly one unit: [`retain`](Ref::retain) (or
/// `clone`) mints another, [`release`](Ref::release) (or dropping) gives one
/// back. When the last unit goes, the destructor (if any) runs with the
/// payload and the block's memory is returned to its [`MemorySource`].
///
/// The payload is raw bytes shared by every owner. The count guards the
/// block's lifetime only; synchronizing writes to the payload is up to the
/// owners.
///
/// **Typical Usage**:
/// ```
/// use refc::Ref;
///
/// let block = Ref::allocate(64).unwrap();
/// let shared = block.retain();
/// assert_eq!(block.count(), 2);
///
/// unsafe { block.access().as_ptr().write(7) };
/// assert_eq!(unsafe { shared.access().as_ptr().read() }, 7);
///
/// shared.release();
/// block.release();
/// ```
///
/// 对引用计数块的一个所有权单位。
/// 每个 `Ref` 值恰好是一个单位：`retain`（或 `clone`）产生新单位，
/// `release`（或 drop）归还一个单位。最后一个单位消失时，
/// 析构函数（如果有）以负载为参数运行，然后块的内存归还给其 `MemorySource`。
/// 计数只保护块的生命周期；负载内容的同步由拥有者负责。
pub struct Ref<M: MemorySource = SystemMemory> {
    ptr: NonNull<BlockHeader<M>>,
    _marker: PhantomData<BlockHeader<M>>,
}

// SAFETY: the header is only mutated through atomics, except the destructor
// slot, which only the thread that observed the count reach zero touches.
// The destructor itself is `Send`.
unsafe impl<M: MemorySource> Send for Ref<M> {}
unsafe impl<M: MemorySource> Sync for Ref<M> {}

impl Ref<SystemMemory> {
    /// Allocate a zero-filled block of `size` bytes with an ownership count of 1.
    ///
    /// 分配一个 `size` 字节、以零填充、所有权计数为 1 的块。
    #[inline]
    pub fn allocate(size: usize) -> Result<Self, AllocError> {
        Self::builder(size).allocate()
    }

    /// Allocate a block whose `destructor` runs when the count reaches zero.
    ///
    /// 分配一个块，其 `destructor` 在计数归零时运行。
    #[inline]
    pub fn allocate_with_destructor<D: Destructor>(
        size: usize,
        destructor: D,
    ) -> Result<Self, AllocError> {
        Self::builder(size).destructor(destructor).allocate()
    }

    /// Create a builder for a block of `size` bytes.
    ///
    /// # Example
    /// ```
    /// use refc::{Ref, TrackingMemory};
    ///
    /// let memory = TrackingMemory::new();
    /// let block = Ref::builder(32)
    ///     .memory(memory.clone())
    ///     .destructor(|payload: &mut [u8]| assert_eq!(payload.len(), 32))
    ///     .allocate()
    ///     .unwrap();
    /// drop(block);
    /// assert_eq!(memory.live_bytes(), 0);
    /// ```
    #[inline]
    pub fn builder(size: usize) -> BlockBuilder<SystemMemory> {
        BlockBuilder::new(size)
    }
}

impl<M: MemorySource> Ref<M> {
    /// Allocate a block of `size` bytes from `memory`.
    #[inline]
    pub fn allocate_in(size: usize, memory: M) -> Result<Self, AllocError> {
        BlockBuilder::new(size).memory(memory).allocate()
    }

    pub(crate) fn from_parts(
        size: usize,
        destructor: Option<Box<dyn Destructor>>,
        memory: M,
    ) -> Result<Self, AllocError> {
        let Some((payload, payload_layout)) = BlockHeader::acquire_payload(&memory, size) else {
            trace!(size, "memory source refused payload");
            return Err(AllocError::OutOfMemory { size });
        };

        let Some(raw) = memory.acquire(Layout::new::<BlockHeader<M>>()) else {
            trace!(size, "memory source refused block header");
            if size != 0 {
                // SAFETY: acquired just above and never handed out.
                unsafe { memory.release(payload, payload_layout) };
            }
            return Err(AllocError::OutOfMemory { size });
        };

        let ptr = raw.cast::<BlockHeader<M>>();
        // SAFETY: `raw` is valid for a `BlockHeader<M>`.
        unsafe {
            ptr.as_ptr().write(BlockHeader {
                strong: AtomicUsize::new(1),
                #[cfg(feature = "cycle-guard")]
                weak: AtomicUsize::new(1),
                #[cfg(feature = "borrow-count")]
                borrows: AtomicUsize::new(0),
                destructor: UnsafeCell::new(destructor),
                #[cfg(feature = "cycle-guard")]
                links: LinkList::new(),
                memory,
                payload,
                payload_layout,
            });
        }

        trace!(block = ?ptr, size, "block allocated");

        Ok(Self {
            ptr,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub(crate) fn header(&self) -> &BlockHeader<M> {
        // SAFETY: we hold an ownership unit, so the header is alive.
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub(crate) fn header_ptr(&self) -> NonNull<BlockHeader<M>> {
        self.ptr
    }

    /// Take another unit of ownership over the same block.
    ///
    /// Aborts the process if the count would exceed `isize::MAX`.
    ///
    /// 获取同一块的另一个所有权单位。
    #[inline]
    pub fn retain(&self) -> Self {
        // Relaxed is enough: a new unit can only be minted from an existing
        // one, which already keeps the block alive.
        let old = self.header().strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            trace!(block = ?self.ptr, "ownership count overflow");
            std::process::abort();
        }
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }

    /// Give back this unit of ownership.
    ///
    /// If it was the last one, the destructor runs and the block's memory is
    /// returned to its source. Same as dropping the `Ref`.
    ///
    /// 归还此所有权单位。如果这是最后一个，析构函数运行，块的内存归还给其来源。
    #[inline]
    pub fn release(self) {
        drop(self)
    }

    /// Address of the payload. Stable for the whole life of the block.
    ///
    /// Reads and writes through it are only valid while some unit of
    /// ownership is held; races between owners writing the payload are the
    /// owners' problem.
    ///
    /// 负载的地址。在块的整个生命周期内保持不变。
    #[inline]
    pub fn access(&self) -> NonNull<u8> {
        self.header().payload
    }

    /// Payload size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.header().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the ownership count. Other threads may change it at any time.
    #[inline]
    pub fn count(&self) -> usize {
        self.header().strong.load(Ordering::Acquire)
    }

    /// Whether both handles own the same block.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Record a parent -> child edge from `self` to `child`.
    ///
    /// With the `cycle-guard` feature the edge is refused when `self` is
    /// already reachable from `child`. Without it this always succeeds.
    /// Edges are diagnostic records, not ownership: `child`'s count is untouched.
    ///
    /// 记录一条从 `self` 到 `child` 的父 -> 子边。
    /// 启用 `cycle-guard` 时，如果从 `child` 已能到达 `self`，则拒绝此边。
    #[inline]
    pub fn link(&self, child: &Self) -> Result<(), LinkError> {
        ActiveGuard::link(self, child)
    }

    /// Remove one live `self` -> `child` edge.
    ///
    /// 移除一条存活的 `self` -> `child` 边。
    #[inline]
    pub fn unlink(&self, child: &Self) -> Result<(), UnlinkError> {
        ActiveGuard::unlink(self, child)
    }

    /// Number of live outgoing edges. Tombstoned edges are not counted.
    #[cfg(feature = "cycle-guard")]
    pub fn link_count(&self) -> usize {
        self.header().links.live_len()
    }

    /// Run the destructor, return the payload and drop this owner's pin on the header.
    ///
    /// # Safety
    ///
    /// The caller must have observed the ownership count go from 1 to 0.
    #[cold]
    #[inline(never)]
    unsafe fn destroy(ptr: NonNull<BlockHeader<M>>) {
        let header = unsafe { ptr.as_ref() };

        // SAFETY: nobody else owns the block any more. Link traversals only
        // ever read the header's counters and links, never the payload or
        // the destructor slot.
        let payload = unsafe { slice::from_raw_parts_mut(header.payload.as_ptr(), header.len()) };
        if let Some(destructor) = unsafe { (*header.destructor.get()).take() } {
            destructor.destroy(payload);
        }

        #[cfg(feature = "borrow-count")]
        crate::borrow::report_open_borrows(ptr, header);

        unsafe { header.release_payload() };

        // A destroyed block is no longer a parent of anything.
        #[cfg(feature = "cycle-guard")]
        header.links.tombstone_all();

        trace!(block = ?ptr, "block destroyed");

        #[cfg(feature = "cycle-guard")]
        unsafe {
            release_pin(ptr)
        };
        #[cfg(not(feature = "cycle-guard"))]
        unsafe {
            deallocate(ptr)
        };
    }
}

/// Drop one pin on a header; free it (and its link chain) on the last.
///
/// Freeing a chain unpins every child its live nodes still name, so this
/// walks a worklist instead of recursing.
///
/// # Safety
///
/// The caller must own one pin on `ptr`.
#[cfg(feature = "cycle-guard")]
pub(crate) unsafe fn release_pin<M: MemorySource>(ptr: NonNull<BlockHeader<M>>) {
    let mut next = Some(ptr);
    let mut pending = Vec::new();

    while let Some(ptr) = next.take().or_else(|| pending.pop()) {
        let header = unsafe { ptr.as_ref() };
        if header.weak.fetch_sub(1, Ordering::Release) != 1 {
            continue;
        }
        fence(Ordering::Acquire);

        // SAFETY: the last pin is gone; no traversal can reach this chain.
        unsafe { header.links.drain(&header.memory, |child| pending.push(child)) };
        unsafe { deallocate(ptr) };
    }
}

/// Drop the header in place and return its memory to the source.
/// The payload must already be gone.
unsafe fn deallocate<M: MemorySource>(ptr: NonNull<BlockHeader<M>>) {
    let memory = unsafe { ptr.as_ref() }.memory.clone();

    unsafe {
        ptr::drop_in_place(ptr.as_ptr());
        memory.release(ptr.cast(), Layout::new::<BlockHeader<M>>());
    }
}

impl<M: MemorySource> Clone for Ref<M> {
    #[inline]
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<M: MemorySource> Drop for Ref<M> {
    /// Only the owner whose decrement produced zero destroys the block.
    /// 只有使计数减到零的拥有者销毁该块。
    #[inline]
    fn drop(&mut self) {
        if self.header().strong.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        // Pairs with the Release decrements of every other owner, so their
        // payload writes happen-before the destructor.
        fence(Ordering::Acquire);

        unsafe { Self::destroy(self.ptr) }
    }
}

impl<M: MemorySource> std::fmt::Debug for Ref<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("block", &self.ptr)
            .field("len", &self.len())
            .field("count", &self.count())
            .finish()
    }
}
