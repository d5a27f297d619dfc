//! Fixed-region buddy allocator.
//!
//! A [`BuddyArena`] carves one contiguous region into power-of-two blocks
//! (`MIN << order`), splits larger free blocks to serve requests and merges
//! freed buddies back together. Free lists are intrusive: each free block
//! stores the link to the next one. Allocated blocks carry a
//! [`HEADER_OFFSET`]-byte header holding their order and a tombstone flag, so
//! freeing needs nothing but the pointer.
//!
//! ```text
//! region:  [.............................. 4096 ..............................]
//! alloc:   [hdr|data 192][256 free][  512 free  ][   1024 free   ][ 2048 free ]
//!           order 2       order 2    order 3       order 4          order 5
//! ```
//!
//! Arenas are not synchronized; [`LockedArena`] serializes access and
//! implements [`GlobalAlloc`](core::alloc::GlobalAlloc).

#![allow(clippy::missing_safety_doc)]

mod arena;
mod chunk;
pub mod config;
pub mod header;
mod locked;
pub mod region;
mod status;

pub use arena::{ArenaStats, BuddyArena};
pub use chunk::Chunk;
pub use config::{ArenaConfig, OrderZeroFree, TombstoneMode};
pub use header::HEADER_OFFSET;
pub use locked::{GlobalBuddy, LockedArena, SpinGuard, SpinLock};
pub use region::MappedRegion;
pub use status::{ArenaError, FreeStatus};
