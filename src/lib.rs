//! Manually reference-counted heap blocks.
//!
//! A [`Ref`] is one unit of ownership over a block of raw, zero-filled
//! memory. Retaining mints another unit, releasing gives one back, and the
//! release that takes the count to zero runs the block's optional
//! [`Destructor`] and returns the memory to its [`MemorySource`].
//!
//! 1. You own any block you allocate.
//! 2. A `&Ref` you are handed is not yours. To keep it, [`Ref::retain`] it.
//! 3. Every unit you own is released exactly once (dropping does it for you).
//!
//! Build modes (Cargo features, mutually exclusive):
//! - `cycle-guard` (default): [`Ref::link`] records parent -> child edges and
//!   refuses any edge that would close a cycle. Cycles are detected, never
//!   collected.
//! - `borrow-count`: [`Ref::open`] / [`Ref::close`] count transient accesses
//!   separately from ownership.
//! - neither: `link` / `unlink` compile to no-ops.
//!
//! 手动引用计数的堆块。
//! `Ref` 是对一块以零填充的原始内存的一个所有权单位。
//! retain 产生新单位，release 归还一个单位，使计数归零的那次 release
//! 运行块的可选析构函数，并将内存归还给其 `MemorySource`。
//!
//! ```
//! use refc::{LinkError, Ref};
//!
//! let parent = Ref::allocate(64).unwrap();
//! let child = Ref::allocate(64).unwrap();
//!
//! parent.link(&child).unwrap();
//! # #[cfg(feature = "cycle-guard")]
//! assert_eq!(child.link(&parent), Err(LinkError::CycleDetected));
//! ```

#[cfg(all(feature = "cycle-guard", feature = "borrow-count"))]
compile_error!("features `cycle-guard` and `borrow-count` are mutually exclusive");

mod block;
mod builder;
mod error;
mod guard;
mod memory;
mod state;
mod sync;

#[cfg(feature = "borrow-count")]
mod borrow;
#[cfg(feature = "cycle-guard")]
mod links;

pub use block::{Destructor, Ref};
pub use builder::BlockBuilder;
pub use error::{AllocError, LinkError, UnlinkError};
pub use guard::{ActiveGuard, EdgeGuard, NoGuard};
pub use memory::{MemorySource, SystemMemory, TrackingMemory};

#[cfg(feature = "borrow-count")]
pub use borrow::Borrow;
#[cfg(feature = "cycle-guard")]
pub use guard::CycleGuard;

#[cfg(all(test, not(feature = "loom")))]
mod tests;
