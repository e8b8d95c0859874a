use crate::block::Ref;
use crate::error::{LinkError, UnlinkError};
use crate::memory::MemorySource;

#[cfg(feature = "cycle-guard")]
use crate::block::release_pin;
#[cfg(feature = "cycle-guard")]
use crate::state::BlockHeader;
#[cfg(feature = "cycle-guard")]
use crate::sync::Ordering;
#[cfg(feature = "cycle-guard")]
use std::collections::HashSet;
#[cfg(feature = "cycle-guard")]
use std::ptr::NonNull;
#[cfg(feature = "cycle-guard")]
use tracing::{debug, warn};

/// Policy deciding whether a parent -> child edge may be recorded.
///
/// [`Ref::link`] and [`Ref::unlink`] dispatch to [`ActiveGuard`], which is
/// chosen at build time by the `cycle-guard` feature.
///
/// 决定是否可以记录父 -> 子边的策略。
/// `Ref::link` 和 `Ref::unlink` 分派给在构建时由 `cycle-guard` 特性选择的 `ActiveGuard`。
pub trait EdgeGuard {
    fn link<M: MemorySource>(parent: &Ref<M>, child: &Ref<M>) -> Result<(), LinkError>;
    fn unlink<M: MemorySource>(parent: &Ref<M>, child: &Ref<M>) -> Result<(), UnlinkError>;
}

/// Records nothing. `link` always succeeds and `unlink` has no effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGuard;

impl EdgeGuard for NoGuard {
    #[inline(always)]
    fn link<M: MemorySource>(_parent: &Ref<M>, _child: &Ref<M>) -> Result<(), LinkError> {
        Ok(())
    }

    #[inline(always)]
    fn unlink<M: MemorySource>(_parent: &Ref<M>, _child: &Ref<M>) -> Result<(), UnlinkError> {
        Ok(())
    }
}

/// Keeps the recorded edge graph acyclic.
///
/// `link` searches depth-first from the child along live edges; if the parent
/// is reachable (or is the child itself) the edge is refused and nothing
/// changes. Otherwise a node is pushed onto the parent's lock-free link list.
/// `unlink` tombstones the first live matching node, which also lets go of
/// the child's header.
///
/// Two racing `link` calls that together close a cycle can both pass the
/// search: detection is advisory, not a lock.
///
/// 保持已记录的边图无环。
/// `link` 沿存活边从子节点开始深度优先搜索；如果能到达父节点（或父子相同），
/// 则拒绝此边且不做任何修改。否则将节点推入父块的无锁链表。
/// `unlink` 对第一个匹配的存活节点做墓碑标记。
#[cfg(feature = "cycle-guard")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleGuard;

#[cfg(feature = "cycle-guard")]
impl EdgeGuard for CycleGuard {
    fn link<M: MemorySource>(parent: &Ref<M>, child: &Ref<M>) -> Result<(), LinkError> {
        let parent_ptr = parent.header_ptr();
        let child_ptr = child.header_ptr();

        if reaches(child_ptr, parent_ptr) {
            debug!(parent = ?parent_ptr, child = ?child_ptr, "link rejected: cycle");
            return Err(LinkError::CycleDetected);
        }

        // The node pins the child's header while it stays live.
        child.header().weak.fetch_add(1, Ordering::Relaxed);

        let parent_header = parent.header();
        if let Err(err) = parent_header.links.push(child_ptr, &parent_header.memory) {
            // `child` still holds an ownership unit, so this is never the last pin.
            child.header().weak.fetch_sub(1, Ordering::Relaxed);
            warn!(parent = ?parent_ptr, child = ?child_ptr, "link node allocation failed");
            return Err(err);
        }

        Ok(())
    }

    fn unlink<M: MemorySource>(parent: &Ref<M>, child: &Ref<M>) -> Result<(), UnlinkError> {
        if parent.header().links.tombstone(child.header_ptr()) {
            Ok(())
        } else {
            debug!(parent = ?parent.header_ptr(), child = ?child.header_ptr(), "unlink: no live edge");
            Err(UnlinkError::NotFound)
        }
    }
}

/// Whether `target` is reachable from `from` along live edges (`from == target` counts).
///
/// Tombstoned entries are skipped. Every header the search steps onto is
/// pinned first and unpinned when the search ends, so a block destroyed
/// mid-search keeps its header (never its payload) until then.
#[cfg(feature = "cycle-guard")]
fn reaches<M: MemorySource>(from: NonNull<BlockHeader<M>>, target: NonNull<BlockHeader<M>>) -> bool {
    if from == target {
        return true;
    }

    let mut stack = vec![from];
    let mut visited = HashSet::from([from]);
    let mut pins = Vec::new();
    let mut found = false;

    'search: while let Some(block) = stack.pop() {
        // SAFETY: `from` is held by the caller's handle; everything else on
        // the stack carries a pin taken below.
        let header = unsafe { block.as_ref() };
        for node in header.links.iter() {
            let child = node.child();
            if child == target {
                if node.is_live() {
                    found = true;
                    break 'search;
                }
                continue;
            }
            if visited.contains(&child) {
                continue;
            }
            if let Some(child) = node.acquire_child() {
                visited.insert(child);
                pins.push(child);
                stack.push(child);
            }
        }
    }

    for pin in pins {
        // SAFETY: each entry is one pin taken by `acquire_child`.
        unsafe { release_pin(pin) };
    }
    found
}

#[cfg(feature = "cycle-guard")]
pub type ActiveGuard = CycleGuard;

#[cfg(not(feature = "cycle-guard"))]
pub type ActiveGuard = NoGuard;
