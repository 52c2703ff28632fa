//! # Page frame database
//!
//! Tracks every physical page of RAM and decides which one is handed out
//! next. Pages live on one of several tiers between uses:
//!
//! | Tier              | Holds                                         | Available |
//! |-------------------|-----------------------------------------------|:---------:|
//! | Zeroed            | free pages known to contain zeroes            | yes       |
//! | Free              | free pages with stale contents                | yes       |
//! | Standby[0..8]     | clean transition pages, still valid for a PTE | yes       |
//! | Modified          | dirty transition pages awaiting the writer    | no        |
//! | ModifiedNoWrite   | dirty transition pages that may not be written| no        |
//! | Bad               | pages taken out of service                    | no        |
//! | Rom               | read-only memory                              | no        |
//!
//! All structural changes happen under a single PFN lock, obtained with
//! [`PageFrameDatabase::lock`]. Reference counts and short flags are atomics
//! with lock-free fast paths, see [`refcount`].
//!
//! ```text
//!              remove_any_page / remove_zero_page
//!   Zeroed ──┐                                   ┌──> consumer
//!   Free ────┼───────────────────────────────────┤
//!   Standby ─┘   <── last reference, clean ───── │
//!   Modified  <── last reference, dirty ──────── ┘
//!   Free ── ZeroPageWorker ──> Zeroed
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod allocation;
pub mod availability;
pub mod bugcheck;
pub mod collab;
mod color;
pub mod config;
mod database;
pub mod frame;
pub mod list;
pub mod record;
pub mod refcount;
pub mod stats;
pub mod verify;
pub mod zero;

pub use availability::{AvailabilityEvents, WaitKind};
pub use bugcheck::{BugCheck, ListCorruption, MemoryManagement, bug_check};
pub use collab::{BackingStore, Collaborators, FrameZeroing, TransitionPtes, WriterSignals};
pub use config::{ConfigError, PfnConfig, VictimSelection};
pub use database::{PageFrameDatabase, PfnGuard};
pub use frame::{ColorCursor, ColorLayout, FrameIndex, PageColor};
pub use list::ListId;
pub use record::{
    BackingDescriptor, CacheAttribute, FileId, FrameInfo, ListMembership, STANDBY_PRIORITIES,
    ShortFlags, StandbyPriority, Tier,
};
pub use refcount::ChargeError;
pub use stats::PfnStats;
pub use verify::ConsistencyError;
pub use zero::ZeroPageWorker;
