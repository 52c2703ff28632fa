//! Per-frame records.
//!
//! Every physical page has two parts:
//!
//! * [`FrameAtomics`]: the reference count and the [`ShortFlags`]. Both are
//!   atomics and may be touched without the PFN lock, subject to the rules
//!   in [`refcount`](crate::refcount).
//! * [`PageFrameRecord`]: membership, links, share count, color and the
//!   ownership overlay. These live inside the PFN lock.
//!
//! The overlay ([`FrameUse`]) is a tagged union of the states that share
//! storage in a physical page record: while a page sits on Free or Zeroed
//! its scratch space threads the colored index, while it is mapped or in
//! transition it holds the backing descriptor the PTE is restored to.

use crate::frame::{FrameIndex, PageColor};
use bitfield_struct::bitfield;
use core::sync::atomic::{AtomicU16, Ordering};

pub const STANDBY_PRIORITIES: usize = 8;

/// Standby list priority. Priority 0 is repurposed first.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StandbyPriority(u8);

impl StandbyPriority {
    pub const LOWEST: Self = Self(0);
    pub const HIGHEST: Self = Self(STANDBY_PRIORITIES as u8 - 1);

    #[must_use]
    pub const fn new(priority: u8) -> Option<Self> {
        if (priority as usize) < STANDBY_PRIORITIES {
            Some(Self(priority))
        } else {
            None
        }
    }

    /// Panics (at compile time in const context) when out of range.
    #[must_use]
    pub const fn new_const(priority: u8) -> Self {
        assert!((priority as usize) < STANDBY_PRIORITIES);
        Self(priority)
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// All priorities, in repurposing order.
    pub fn all() -> impl DoubleEndedIterator<Item = Self> {
        (0..STANDBY_PRIORITIES as u8).map(Self)
    }
}

/// The lists a page can live on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tier {
    Zeroed,
    Free,
    Standby(StandbyPriority),
    Modified,
    ModifiedNoWrite,
    Bad,
    Rom,
}

impl Tier {
    /// Counts towards available pages.
    #[inline]
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Zeroed | Self::Free | Self::Standby(_))
    }

    /// Threaded through the colored index.
    #[inline]
    #[must_use]
    pub const fn is_colored(self) -> bool {
        matches!(self, Self::Zeroed | Self::Free)
    }

    /// Holds transition pages whose PTE still refers to them.
    #[inline]
    #[must_use]
    pub const fn is_transition(self) -> bool {
        matches!(
            self,
            Self::Standby(_) | Self::Modified | Self::ModifiedNoWrite
        )
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ListMembership {
    /// Owned by a consumer, or freshly taken off a list.
    #[default]
    NotListed,
    Listed(Tier),
    /// Taken by a zero-fill worker and being zeroed outside the lock.
    Zeroing,
}

impl ListMembership {
    #[inline]
    #[must_use]
    pub const fn tier(self) -> Option<Tier> {
        match self {
            Self::Listed(tier) => Some(tier),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CacheAttribute {
    #[default]
    Cached,
    WriteCombined,
    NonCached,
}

/// Identifies a mapped file for the collaborators.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FileId(pub u32);

impl core::fmt::Display for FileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "file #{}", self.0)
    }
}

/// What the owning PTE is restored to when the page is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackingDescriptor {
    /// Anonymous memory never written out.
    DemandZero,
    /// Anonymous memory with (or destined for) paging-file space.
    PagingFile { file: u8, offset: u64 },
    /// A page of a mapped file or image.
    MappedFile {
        file: FileId,
        offset: u64,
        image: bool,
    },
}

impl BackingDescriptor {
    /// Dirty copies of the page go to a paging file rather than a mapped file.
    #[inline]
    #[must_use]
    pub const fn destined_for_paging_file(&self) -> bool {
        !matches!(self, Self::MappedFile { .. })
    }

    #[inline]
    #[must_use]
    pub const fn mapped_file(&self) -> Option<FileId> {
        match self {
            Self::MappedFile { file, .. } => Some(*file),
            _ => None,
        }
    }

    /// Shared pages are reached through a section prototype, private pages
    /// through a process PTE.
    #[inline]
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::MappedFile { .. })
    }
}

/// Tagged overlay, see the module docs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) enum FrameUse {
    #[default]
    Unowned,
    ColorChained {
        next: FrameIndex,
        prev: FrameIndex,
    },
    Mapped {
        original: BackingDescriptor,
        page_table: Option<FrameIndex>,
    },
}

#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct ShortFlags {
    /// Contents differ from the backing store.
    pub modified: bool,
    pub read_in_progress: bool,
    pub write_in_progress: bool,
    /// Send to Bad instead of any available list.
    pub removal_requested: bool,
    pub must_be_cached: bool,
    pub rom: bool,
    /// The owning PTE has been deleted; the page goes to Free on last dereference.
    pub deleted: bool,
    #[bits(9)]
    __reserved: u16,
}

/// Lock-free half of a record.
#[derive(Debug, Default)]
pub(crate) struct FrameAtomics {
    reference_count: AtomicU16,
    flags: AtomicU16,
}

impl FrameAtomics {
    #[inline]
    pub fn reference_count(&self) -> u16 {
        self.reference_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reference_count_cell(&self) -> &AtomicU16 {
        &self.reference_count
    }

    #[inline]
    pub fn flags(&self) -> ShortFlags {
        ShortFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Atomic read-modify-write of the flags. Returns the previous value.
    pub fn update_flags(&self, mut f: impl FnMut(ShortFlags) -> ShortFlags) -> ShortFlags {
        let mut current = self.flags.load(Ordering::Relaxed);
        loop {
            let next = f(ShortFlags::from_bits(current)).into_bits();
            match self.flags.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(previous) => return ShortFlags::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Keeps only the flags that survive a trip through Free/Zeroed.
    #[inline]
    pub fn reset_transient_flags(&self) {
        self.update_flags(|f| {
            ShortFlags::new()
                .with_must_be_cached(f.must_be_cached())
                .with_rom(f.rom())
        });
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ListLinks {
    pub flink: FrameIndex,
    pub blink: FrameIndex,
}

impl ListLinks {
    pub const UNLINKED: Self = Self {
        flink: FrameIndex::EMPTY,
        blink: FrameIndex::EMPTY,
    };
}

/// Lock-guarded half of a record.
#[derive(Clone, Debug)]
pub(crate) struct PageFrameRecord {
    pub membership: ListMembership,
    pub links: ListLinks,
    pub share_count: u32,
    pub color: PageColor,
    pub cache_attribute: CacheAttribute,
    pub priority: StandbyPriority,
    pub usage: FrameUse,
}

impl PageFrameRecord {
    pub const fn new(color: PageColor, priority: StandbyPriority) -> Self {
        Self {
            membership: ListMembership::NotListed,
            links: ListLinks::UNLINKED,
            share_count: 0,
            color,
            cache_attribute: CacheAttribute::Cached,
            priority,
            usage: FrameUse::Unowned,
        }
    }

    pub const fn original(&self) -> Option<BackingDescriptor> {
        match self.usage {
            FrameUse::Mapped { original, .. } => Some(original),
            _ => None,
        }
    }

    pub const fn page_table(&self) -> Option<FrameIndex> {
        match self.usage {
            FrameUse::Mapped { page_table, .. } => page_table,
            _ => None,
        }
    }
}

/// Snapshot of one frame, for callers and tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub frame: FrameIndex,
    pub membership: ListMembership,
    pub reference_count: u16,
    pub share_count: u32,
    pub color: PageColor,
    pub cache_attribute: CacheAttribute,
    pub priority: StandbyPriority,
    pub flags: ShortFlags,
    pub original: Option<BackingDescriptor>,
    pub page_table: Option<FrameIndex>,
}
