use crate::block::{Destructor, Ref};
use crate::error::AllocError;
use crate::memory::{MemorySource, SystemMemory};
use std::boxed::Box;

/// Builder for configuring a new block.
///
/// - `memory`: the source the block (and, with `cycle-guard`, its link
///   nodes) is allocated from. Default: [`SystemMemory`].
/// - `destructor`: callback run once when the count reaches zero. Default: none.
///
/// # Example
/// ```
/// use refc::Ref;
///
/// let block = Ref::builder(16)
///     .destructor(|payload: &mut [u8]| payload.fill(0xAA))
///     .allocate()
///     .unwrap();
/// assert_eq!(block.len(), 16);
/// ```
///
/// 用于配置新块的构建器。
pub struct BlockBuilder<M: MemorySource = SystemMemory> {
    size: usize,
    destructor: Option<Box<dyn Destructor>>,
    memory: M,
}

impl BlockBuilder<SystemMemory> {
    /// Create a builder for a `size`-byte payload with default settings.
    /// 创建一个 `size` 字节负载、默认设置的构建器。
    #[inline]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            destructor: None,
            memory: SystemMemory,
        }
    }
}

impl<M: MemorySource> BlockBuilder<M> {
    /// Allocate from `memory` instead.
    ///
    /// 改为从 `memory` 分配。
    #[inline]
    pub fn memory<N: MemorySource>(self, memory: N) -> BlockBuilder<N> {
        BlockBuilder {
            size: self.size,
            destructor: self.destructor,
            memory,
        }
    }

    /// Set the destructor, replacing any previous one.
    ///
    /// 设置析构函数，替换之前的任何析构函数。
    #[inline]
    pub fn destructor<D: Destructor>(mut self, destructor: D) -> Self {
        self.destructor = Some(Box::new(destructor));
        self
    }

    /// Allocate the block with an ownership count of 1.
    ///
    /// 以所有权计数 1 分配块。
    #[inline]
    pub fn allocate(self) -> Result<Ref<M>, AllocError> {
        Ref::from_parts(self.size, self.destructor, self.memory)
    }
}
