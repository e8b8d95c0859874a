use crate::block::Ref;
use crate::memory::MemorySource;
use crate::state::BlockHeader;
use crate::sync::Ordering;
use std::ptr::NonNull;
use tracing::warn;

impl<M: MemorySource> Ref<M> {
    /// Record an open access and return the payload address.
    ///
    /// Every `open` should be matched by a [`close`](Ref::close) before the
    /// last ownership unit is released. Nothing enforces this; the count is
    /// there for callers to assert on.
    ///
    /// 记录一次打开的访问并返回负载地址。
    /// 每次 `open` 都应在最后一个所有权单位释放前与一次 `close` 配对。
    #[inline]
    pub fn open(&self) -> NonNull<u8> {
        self.header().borrows.fetch_add(1, Ordering::AcqRel);
        self.access()
    }

    /// Close an access opened with [`open`](Ref::open).
    #[inline]
    pub fn close(&self) {
        let prev = self.header().borrows.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "close without a matching open");
    }

    /// Accesses opened and not yet closed.
    #[inline]
    pub fn borrow_count(&self) -> usize {
        self.header().borrows.load(Ordering::Acquire)
    }

    /// Open an access that closes itself when dropped.
    ///
    /// # Example
    /// ```
    /// use refc::Ref;
    ///
    /// let block = Ref::allocate(8).unwrap();
    /// {
    ///     let access = block.borrow();
    ///     assert_eq!(block.borrow_count(), 1);
    ///     unsafe { access.as_ptr().as_ptr().write(1) };
    /// }
    /// assert_eq!(block.borrow_count(), 0);
    /// ```
    #[inline]
    pub fn borrow(&self) -> Borrow<'_, M> {
        let ptr = self.open();
        Borrow { block: self, ptr }
    }
}

/// An open access to a block's payload.
///
/// Obtained from [`Ref::borrow`]; closes on drop or via [`Borrow::close`].
///
/// 对块负载的一次打开的访问。drop 时或通过 `Borrow::close` 关闭。
#[must_use]
pub struct Borrow<'a, M: MemorySource> {
    block: &'a Ref<M>,
    ptr: NonNull<u8>,
}

impl<M: MemorySource> Borrow<'_, M> {
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Close explicitly.
    #[inline]
    pub fn close(self) {
        drop(self)
    }
}

impl<M: MemorySource> Drop for Borrow<'_, M> {
    #[inline]
    fn drop(&mut self) {
        self.block.close();
    }
}

/// Log destruction of a block that still has accesses open.
pub(crate) fn report_open_borrows<M: MemorySource>(block: NonNull<BlockHeader<M>>, header: &BlockHeader<M>) {
    let open = header.borrows.load(Ordering::Acquire);
    if open != 0 {
        warn!(block = ?block, open, "block destroyed with open accesses");
    }
}
