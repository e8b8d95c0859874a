use thiserror::Error;

/// Failure to obtain memory for a new block.
///
/// 为新块获取内存失败。
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The memory source refused the request, or the request cannot be
    /// described as a valid layout at all.
    #[error("out of memory: cannot acquire a block with a {size}-byte payload")]
    OutOfMemory { size: usize },
}

/// Rejection of a parent -> child edge.
///
/// 父 -> 子边被拒绝。
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The parent is already reachable from the child (or they are the same block).
    #[error("link would close an ownership cycle")]
    CycleDetected,
    /// The link node could not be allocated.
    #[error("failed to allocate a link node")]
    AllocationFailed,
}

/// Failure to remove a parent -> child edge.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkError {
    #[error("no live link from parent to child")]
    NotFound,
}
