use crate::block::release_pin;
use crate::error::LinkError;
use crate::memory::MemorySource;
use crate::state::BlockHeader;
use crate::sync::{AtomicPtr, AtomicUsize, Ordering};
use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// Set while the edge has not been tombstoned.
const LIVE: usize = 1;
/// One cycle search currently reading `child` through this node.
const READER: usize = 2;

/// One recorded parent -> child edge.
///
/// `child` and `next` never change after the node is published; only `state`
/// does. A live node holds one weak pin on `child`. That pin is dropped once
/// the node is tombstoned and no reader is left on it, by whichever of the
/// two happens last.
///
/// 一条已记录的父 -> 子边。
/// 节点发布后 `child` 和 `next` 不再改变，只有 `state` 会变。
/// 存活节点对 `child` 持有一个弱钉住；节点被墓碑标记且没有读者停留后，
/// 由最后完成的一方释放该钉住。
pub(crate) struct LinkNode<M: MemorySource> {
    child: NonNull<BlockHeader<M>>,
    /// `LIVE` bit plus `READER` per reader.
    state: AtomicUsize,
    next: *mut LinkNode<M>,
}

impl<M: MemorySource> LinkNode<M> {
    /// Address of the child. Only comparable, not dereferenceable, unless
    /// pinned through [`acquire_child`](Self::acquire_child).
    #[inline]
    pub(crate) fn child(&self) -> NonNull<BlockHeader<M>> {
        self.child
    }

    /// False once tombstoned.
    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) & LIVE != 0
    }

    /// Take a pin of the caller's own on the child, if the edge is still live.
    ///
    /// The returned header stays allocated until the caller hands the pin
    /// back with `release_pin`.
    pub(crate) fn acquire_child(&self) -> Option<NonNull<BlockHeader<M>>> {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & LIVE == 0 {
                return None;
            }
            match self.state.compare_exchange_weak(
                state,
                state + READER,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => state = current,
            }
        }

        // SAFETY: the node's own pin cannot be dropped while we read through it.
        unsafe { self.child.as_ref() }.weak.fetch_add(1, Ordering::Relaxed);

        if self.state.fetch_sub(READER, Ordering::AcqRel) == READER {
            // Tombstoned while we were on it and we were the last reader:
            // the node's pin is ours to drop. Our own pin keeps the header.
            unsafe { release_pin(self.child) };
        }
        Some(self.child)
    }

    /// Clear `LIVE`. Returns false if someone else already did.
    fn tombstone(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & LIVE == 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state & !LIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => state = current,
            }
        }

        if state == LIVE {
            // No reader on the node: drop its pin now. Otherwise the last
            // reader to step off does it.
            unsafe { release_pin(self.child) };
        }
        true
    }
}

/// Lock-free, push-only singly linked list of a block's outgoing edges.
///
/// Insertion pushes at the head with a CAS retry loop. Removal only
/// tombstones, which releases the child's pin but keeps the node. Nodes are
/// freed all at once by [`drain`](Self::drain), when the owning header is
/// freed and nothing can traverse the list any more.
///
/// 块的出边组成的无锁、只推入的单链表。
/// 插入通过 CAS 重试循环推到表头。移除只做墓碑标记。
/// 节点在拥有者头部被释放时由 `drain` 一次性释放。
pub(crate) struct LinkList<M: MemorySource> {
    head: AtomicPtr<LinkNode<M>>,
}

impl<M: MemorySource> LinkList<M> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Allocate a live node for `child` from `memory` and push it.
    pub(crate) fn push(&self, child: NonNull<BlockHeader<M>>, memory: &M) -> Result<(), LinkError> {
        let layout = Layout::new::<LinkNode<M>>();
        let node = memory
            .acquire(layout)
            .ok_or(LinkError::AllocationFailed)?
            .cast::<LinkNode<M>>()
            .as_ptr();

        // SAFETY: freshly acquired for this layout, private until the CAS below.
        unsafe {
            node.write(LinkNode {
                child,
                state: AtomicUsize::new(LIVE),
                next: ptr::null_mut(),
            });
        }

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(current) => head = current,
            }
        }
    }

    /// Tombstone the first live node naming `child`. Returns whether one was found.
    ///
    /// The flag flip is a CAS so concurrent removals of the same edge claim
    /// distinct nodes.
    pub(crate) fn tombstone(&self, child: NonNull<BlockHeader<M>>) -> bool {
        self.iter().any(|node| node.child == child && node.tombstone())
    }

    /// Tombstone every live node. Used when the owning block is destroyed.
    pub(crate) fn tombstone_all(&self) {
        for node in self.iter() {
            node.tombstone();
        }
    }

    /// Number of live nodes at the time of the walk.
    pub(crate) fn live_len(&self) -> usize {
        self.iter().filter(|node| node.is_live()).count()
    }

    #[inline]
    pub(crate) fn iter(&self) -> Iter<'_, M> {
        Iter {
            next: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }

    /// Free every node, handing the `child` of each still-live one to `unpin`.
    /// Tombstoned nodes gave their pin back already.
    ///
    /// # Safety
    ///
    /// No other thread may be traversing or pushing to this list, and `memory`
    /// must be the source the nodes were pushed with.
    pub(crate) unsafe fn drain(&self, memory: &M, mut unpin: impl FnMut(NonNull<BlockHeader<M>>)) {
        let layout = Layout::new::<LinkNode<M>>();
        let mut current = self.head.swap(ptr::null_mut(), Ordering::Acquire);

        while let Some(node) = NonNull::new(current) {
            let (child, live, next) = {
                let node = unsafe { node.as_ref() };
                (node.child, node.is_live(), node.next)
            };
            unsafe {
                ptr::drop_in_place(node.as_ptr());
                memory.release(node.cast(), layout);
            }
            if live {
                unpin(child);
            }
            current = next;
        }
    }
}

/// Walks a list from the head observed at creation. Nodes pushed later are
/// not seen.
pub(crate) struct Iter<'a, M: MemorySource> {
    next: *mut LinkNode<M>,
    _marker: PhantomData<&'a LinkList<M>>,
}

impl<'a, M: MemorySource> Iterator for Iter<'a, M> {
    type Item = &'a LinkNode<M>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: published nodes live as long as the list they belong to,
        // and `next` was written before the node was published.
        let node = unsafe { self.next.as_ref()? };
        self.next = node.next;
        Some(node)
    }
}
