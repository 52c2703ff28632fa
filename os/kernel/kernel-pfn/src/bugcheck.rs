//! Fatal conditions.
//!
//! The database cannot continue once its structures are known to be
//! inconsistent, so these are not errors to be handled: [`bug_check`] logs
//! the stop code and halts the current context by panicking.

use crate::frame::FrameIndex;
use crate::list::ListId;
use crate::record::{ListMembership, Tier};

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum BugCheck {
    #[error("PFN_LIST_CORRUPT: {0}")]
    PfnListCorrupt(ListCorruption),
    #[error("PFN_REFERENCE_COUNT: frame {frame} has reference count {count}")]
    PfnReferenceCount { frame: FrameIndex, count: u16 },
    #[error("MEMORY_MANAGEMENT: {0}")]
    MemoryManagement(MemoryManagement),
    #[error(
        "NO_PAGES_AVAILABLE: {modified} modified pages, {pages_for_paging_file} destined for the paging file"
    )]
    NoPagesAvailable {
        modified: u64,
        pages_for_paging_file: u64,
    },
    #[error(
        "DIRTY_NOWRITE_PAGES_CONGESTION: {modified} modified pages, {modified_no_write} not writable"
    )]
    DirtyNoWritePagesCongestion { modified: u64, modified_no_write: u64 },
    #[error(
        "DIRTY_MAPPED_PAGES_CONGESTION: {modified} modified pages, {pages_for_paging_file} destined for the paging file"
    )]
    DirtyMappedPagesCongestion {
        modified: u64,
        pages_for_paging_file: u64,
    },
    #[error("DISORDERLY_SHUTDOWN: {modified} modified pages, {available} available")]
    DisorderlyShutdown { modified: u64, available: u64 },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ListCorruption {
    #[error("removal from the empty {0} list")]
    EmptyList(ListId),
    #[error("frame {frame} is already {membership:?}")]
    AlreadyListed {
        frame: FrameIndex,
        membership: ListMembership,
    },
    #[error("frame {frame} is {membership:?}, cannot unlink it here")]
    NotUnlinkable {
        frame: FrameIndex,
        membership: ListMembership,
    },
    #[error("no page available on any list")]
    NothingAvailable,
    #[error("share count underflow on frame {0}")]
    ShareCountUnderflow(FrameIndex),
    #[error("frame {0} is outside the database")]
    InvalidFrame(FrameIndex),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum MemoryManagement {
    #[error("frame {0} carries no backing descriptor for a transition list")]
    TransitionBackingMismatch(FrameIndex),
    #[error("ROM frame {0} placed on a RAM list")]
    RomMismatch(FrameIndex),
    #[error("frame {frame} is mapped {share_count} times while on a transition list")]
    ActiveOnTransitionList { frame: FrameIndex, share_count: u32 },
    #[error("frame {0} changed state while the PFN lock was released")]
    StateChangedWhileUnlocked(FrameIndex),
    #[error("operation not supported on the {0:?} list")]
    UnsupportedOperation(Tier),
}

impl From<ListCorruption> for BugCheck {
    fn from(value: ListCorruption) -> Self {
        Self::PfnListCorrupt(value)
    }
}

impl From<MemoryManagement> for BugCheck {
    fn from(value: MemoryManagement) -> Self {
        Self::MemoryManagement(value)
    }
}

/// Logs the stop code and halts.
#[cold]
#[track_caller]
pub fn bug_check(code: impl Into<BugCheck>) -> ! {
    let code = code.into();
    log::error!("*** STOP: {code}");
    panic!("bug check: {code}");
}
