//! Tier list registry.
//!
//! Every tier is an intrusive doubly linked list threaded through the
//! records by frame index:
//!
//! ```text
//!  ListHead { total, flink ─┐                       blink ─┐ }
//!                           v                              v
//!                  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   EMPTY <─ blink │   frame 17   │<─>│   frame 4    │<─>│   frame 90   │ flink ─> EMPTY
//!                  └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! Free and Zeroed pages are additionally threaded through one list per
//! color, using the overlay links of [`FrameUse::ColorChained`]. Modified
//! pages destined for a paging file sit on a per-color sub-list instead of
//! the main Modified chain; the main head's total counts both.
//!
//! [`PfnState`] only knows about links and totals. The tier operations on
//! [`PfnGuard`] add everything else a membership change implies: available
//! page accounting, the colored index, transition tallies and the writer
//! and zeroing triggers.

use crate::bugcheck::{ListCorruption, MemoryManagement, bug_check};
use crate::collab::Collaborators;
use crate::database::PfnGuard;
use crate::frame::{ColorLayout, FrameIndex, PageColor};
use crate::record::{
    BackingDescriptor, FileId, FrameUse, ListLinks, ListMembership, PageFrameRecord,
    STANDBY_PRIORITIES, StandbyPriority, Tier,
};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Names one list head, including the colored and per-color sub-lists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListId {
    Zeroed,
    Free,
    Standby(StandbyPriority),
    Modified,
    ModifiedNoWrite,
    Bad,
    Rom,
    /// Paging-file destined Modified pages of one color.
    ModifiedColor(PageColor),
    ZeroedColor(PageColor),
    FreeColor(PageColor),
}

impl ListId {
    #[must_use]
    pub const fn of(tier: Tier) -> Self {
        match tier {
            Tier::Zeroed => Self::Zeroed,
            Tier::Free => Self::Free,
            Tier::Standby(p) => Self::Standby(p),
            Tier::Modified => Self::Modified,
            Tier::ModifiedNoWrite => Self::ModifiedNoWrite,
            Tier::Bad => Self::Bad,
            Tier::Rom => Self::Rom,
        }
    }

    /// Chained through the overlay links rather than the primary links.
    const fn uses_color_links(self) -> bool {
        matches!(self, Self::ZeroedColor(_) | Self::FreeColor(_))
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zeroed => f.write_str("Zeroed"),
            Self::Free => f.write_str("Free"),
            Self::Standby(p) => write!(f, "Standby[{}]", p.as_u8()),
            Self::Modified => f.write_str("Modified"),
            Self::ModifiedNoWrite => f.write_str("ModifiedNoWrite"),
            Self::Bad => f.write_str("Bad"),
            Self::Rom => f.write_str("Rom"),
            Self::ModifiedColor(c) => write!(f, "Modified[{}]", c.as_u32()),
            Self::ZeroedColor(c) => write!(f, "Zeroed[{}]", c.as_u32()),
            Self::FreeColor(c) => write!(f, "Free[{}]", c.as_u32()),
        }
    }
}

/// The two lists with a colored index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ColoredList {
    Zeroed = 0,
    Free = 1,
}

impl ColoredList {
    pub const fn of(tier: Tier) -> Option<Self> {
        match tier {
            Tier::Zeroed => Some(Self::Zeroed),
            Tier::Free => Some(Self::Free),
            _ => None,
        }
    }

    pub const fn tier(self) -> Tier {
        match self {
            Self::Zeroed => Tier::Zeroed,
            Self::Free => Tier::Free,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Zeroed => Self::Free,
            Self::Free => Self::Zeroed,
        }
    }

    pub const fn list_id(self, color: PageColor) -> ListId {
        match self {
            Self::Zeroed => ListId::ZeroedColor(color),
            Self::Free => ListId::FreeColor(color),
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ListHead {
    pub total: u64,
    pub flink: FrameIndex,
    pub blink: FrameIndex,
}

impl ListHead {
    pub const EMPTY: Self = Self {
        total: 0,
        flink: FrameIndex::EMPTY,
        blink: FrameIndex::EMPTY,
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Placement {
    Head,
    Tail,
}

/// Everything protected by the PFN lock.
pub(crate) struct PfnState {
    pub records: Vec<PageFrameRecord>,
    pub layout: ColorLayout,
    pub zeroed: ListHead,
    pub free: ListHead,
    pub standby: [ListHead; STANDBY_PRIORITIES],
    pub modified: ListHead,
    pub modified_by_color: Vec<ListHead>,
    pub modified_no_write: ListHead,
    pub bad: ListHead,
    pub rom: ListHead,
    /// Indexed by [`ColoredList::index`], then by color.
    pub colored: [Vec<ListHead>; 2],
    /// Indexed by node, then by [`ColoredList::index`].
    pub node_counts: Vec<[u64; 2]>,
    pub available: u64,
    pub pages_for_paging_file: u64,
    pub transition_private: u64,
    pub transition_shared: u64,
    pub standby_repurposed: u64,
    /// Indexed by zeroing wake slot.
    pub zeroing_active: Vec<bool>,
    pub mapped_write_timer_armed: bool,
    /// File whose dirty pages were discarded and not yet acknowledged.
    pub last_chance_file: Option<FileId>,
}

impl PfnState {
    pub fn new(records: Vec<PageFrameRecord>, layout: ColorLayout) -> Self {
        let colors = layout.total_colors() as usize;
        Self {
            records,
            layout,
            zeroed: ListHead::EMPTY,
            free: ListHead::EMPTY,
            standby: [ListHead::EMPTY; STANDBY_PRIORITIES],
            modified: ListHead::EMPTY,
            modified_by_color: vec![ListHead::EMPTY; colors],
            modified_no_write: ListHead::EMPTY,
            bad: ListHead::EMPTY,
            rom: ListHead::EMPTY,
            colored: [vec![ListHead::EMPTY; colors], vec![ListHead::EMPTY; colors]],
            node_counts: vec![[0; 2]; layout.nodes() as usize],
            available: 0,
            pages_for_paging_file: 0,
            transition_private: 0,
            transition_shared: 0,
            standby_repurposed: 0,
            zeroing_active: vec![false; layout.nodes() as usize + 1],
            mapped_write_timer_armed: false,
            last_chance_file: None,
        }
    }

    #[inline]
    pub fn record(&self, frame: FrameIndex) -> &PageFrameRecord {
        self.records
            .get(frame.as_usize())
            .unwrap_or_else(|| bug_check(ListCorruption::InvalidFrame(frame)))
    }

    #[inline]
    pub fn record_mut(&mut self, frame: FrameIndex) -> &mut PageFrameRecord {
        self.records
            .get_mut(frame.as_usize())
            .unwrap_or_else(|| bug_check(ListCorruption::InvalidFrame(frame)))
    }

    pub fn head(&self, id: ListId) -> &ListHead {
        match id {
            ListId::Zeroed => &self.zeroed,
            ListId::Free => &self.free,
            ListId::Standby(p) => &self.standby[p.as_usize()],
            ListId::Modified => &self.modified,
            ListId::ModifiedNoWrite => &self.modified_no_write,
            ListId::Bad => &self.bad,
            ListId::Rom => &self.rom,
            ListId::ModifiedColor(c) => &self.modified_by_color[c.as_usize()],
            ListId::ZeroedColor(c) => &self.colored[ColoredList::Zeroed.index()][c.as_usize()],
            ListId::FreeColor(c) => &self.colored[ColoredList::Free.index()][c.as_usize()],
        }
    }

    pub fn head_mut(&mut self, id: ListId) -> &mut ListHead {
        match id {
            ListId::Zeroed => &mut self.zeroed,
            ListId::Free => &mut self.free,
            ListId::Standby(p) => &mut self.standby[p.as_usize()],
            ListId::Modified => &mut self.modified,
            ListId::ModifiedNoWrite => &mut self.modified_no_write,
            ListId::Bad => &mut self.bad,
            ListId::Rom => &mut self.rom,
            ListId::ModifiedColor(c) => &mut self.modified_by_color[c.as_usize()],
            ListId::ZeroedColor(c) => {
                &mut self.colored[ColoredList::Zeroed.index()][c.as_usize()]
            }
            ListId::FreeColor(c) => &mut self.colored[ColoredList::Free.index()][c.as_usize()],
        }
    }

    pub fn links(&self, id: ListId, frame: FrameIndex) -> ListLinks {
        let rec = self.record(frame);
        if id.uses_color_links() {
            match rec.usage {
                FrameUse::ColorChained { next, prev } => ListLinks {
                    flink: next,
                    blink: prev,
                },
                _ => ListLinks::UNLINKED,
            }
        } else {
            rec.links
        }
    }

    fn set_links(&mut self, id: ListId, frame: FrameIndex, links: ListLinks) {
        let rec = self.record_mut(frame);
        if id.uses_color_links() {
            rec.usage = FrameUse::ColorChained {
                next: links.flink,
                prev: links.blink,
            };
        } else {
            rec.links = links;
        }
    }

    fn set_flink(&mut self, id: ListId, frame: FrameIndex, flink: FrameIndex) {
        let links = self.links(id, frame);
        self.set_links(id, frame, ListLinks { flink, ..links });
    }

    fn set_blink(&mut self, id: ListId, frame: FrameIndex, blink: FrameIndex) {
        let links = self.links(id, frame);
        self.set_links(id, frame, ListLinks { blink, ..links });
    }

    pub fn link(&mut self, id: ListId, frame: FrameIndex, placement: Placement) {
        match placement {
            Placement::Tail => self.link_tail(id, frame),
            Placement::Head => self.link_head(id, frame),
        }
    }

    pub fn link_tail(&mut self, id: ListId, frame: FrameIndex) {
        let last = self.head(id).blink;
        if last.is_empty() {
            self.head_mut(id).flink = frame;
        } else {
            self.set_flink(id, last, frame);
        }
        self.set_links(
            id,
            frame,
            ListLinks {
                flink: FrameIndex::EMPTY,
                blink: last,
            },
        );
        let head = self.head_mut(id);
        head.blink = frame;
        head.total += 1;
    }

    pub fn link_head(&mut self, id: ListId, frame: FrameIndex) {
        let first = self.head(id).flink;
        if first.is_empty() {
            self.head_mut(id).blink = frame;
        } else {
            self.set_blink(id, first, frame);
        }
        self.set_links(
            id,
            frame,
            ListLinks {
                flink: first,
                blink: FrameIndex::EMPTY,
            },
        );
        let head = self.head_mut(id);
        head.flink = frame;
        head.total += 1;
    }

    pub fn unlink(&mut self, id: ListId, frame: FrameIndex) {
        if self.head(id).total == 0 {
            bug_check(ListCorruption::EmptyList(id));
        }
        let ListLinks { flink, blink } = self.links(id, frame);
        if blink.is_empty() {
            self.head_mut(id).flink = flink;
        } else {
            self.set_flink(id, blink, flink);
        }
        if flink.is_empty() {
            self.head_mut(id).blink = blink;
        } else {
            self.set_blink(id, flink, blink);
        }
        self.set_links(id, frame, ListLinks::UNLINKED);
        self.head_mut(id).total -= 1;
    }

    /// Main Modified chain length; the rest sits on the per-color sub-lists.
    #[inline]
    pub const fn mapped_modified(&self) -> u64 {
        self.modified.total - self.pages_for_paging_file
    }

    pub fn standby_total(&self) -> u64 {
        self.standby.iter().map(|h| h.total).sum()
    }
}

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Appends `frame` to `tier`.
    ///
    /// The frame must be unlisted and unreferenced. Frames flagged for
    /// removal go to Bad instead of any available list; ROM frames may only
    /// go to [`Tier::Rom`].
    pub fn insert_tail(&mut self, tier: Tier, frame: FrameIndex) {
        self.insert(tier, frame, Placement::Tail);
    }

    /// Prepends `frame` to Zeroed or Free.
    ///
    /// Boot-time zeroing inserts at the head so the Zeroed list ends up in
    /// descending physical order.
    pub fn insert_head(&mut self, tier: Tier, frame: FrameIndex) {
        if !tier.is_colored() {
            bug_check(MemoryManagement::UnsupportedOperation(tier));
        }
        self.insert(tier, frame, Placement::Head);
    }

    /// Prepends `frame` to a Standby list or to ModifiedNoWrite, so recently
    /// demoted pages are considered first.
    pub fn insert_front(&mut self, tier: Tier, frame: FrameIndex) {
        if !matches!(tier, Tier::Standby(_) | Tier::ModifiedNoWrite) {
            bug_check(MemoryManagement::UnsupportedOperation(tier));
        }
        self.insert(tier, frame, Placement::Head);
    }

    pub(crate) fn insert(&mut self, tier: Tier, frame: FrameIndex, placement: Placement) {
        let atomics = self.atomics(frame);
        let membership = self.record(frame).membership;
        if membership != ListMembership::NotListed {
            bug_check(ListCorruption::AlreadyListed { frame, membership });
        }
        let count = atomics.reference_count();
        if count != 0 {
            bug_check(crate::BugCheck::PfnReferenceCount { frame, count });
        }

        let flags = atomics.flags();
        if flags.rom() && tier != Tier::Rom {
            bug_check(MemoryManagement::RomMismatch(frame));
        }
        if flags.removal_requested() && tier.is_available() {
            self.redirect_to_bad(tier, frame);
            return;
        }

        log::trace!("insert {frame} into {}", ListId::of(tier));
        match tier {
            Tier::Zeroed | Tier::Free => self.insert_colored(tier, frame, placement),
            Tier::Standby(priority) => {
                let original = self.transition_backing(frame);
                self.state.link(ListId::Standby(priority), frame, placement);
                self.tally_transition(&original, true);
                self.available_incremented();
            }
            Tier::Modified => self.insert_modified(frame, placement),
            Tier::ModifiedNoWrite => {
                let original = self.transition_backing(frame);
                self.state.link(ListId::ModifiedNoWrite, frame, placement);
                self.tally_transition(&original, true);
            }
            Tier::Bad => self.state.link(ListId::Bad, frame, placement),
            Tier::Rom => {
                atomics.update_flags(|f| f.with_rom(true));
                self.state.link(ListId::Rom, frame, placement);
            }
        }
        self.record_mut(frame).membership = ListMembership::Listed(tier);
    }

    fn redirect_to_bad(&mut self, tier: Tier, frame: FrameIndex) {
        if tier.is_transition() {
            self.restore_pte(frame);
        }
        log::debug!("frame {frame} has a removal request, sending it to Bad");
        self.state.link_tail(ListId::Bad, frame);
        self.record_mut(frame).membership = ListMembership::Listed(Tier::Bad);
    }

    fn insert_colored(&mut self, tier: Tier, frame: FrameIndex, placement: Placement) {
        let Some(list) = ColoredList::of(tier) else {
            bug_check(MemoryManagement::UnsupportedOperation(tier));
        };
        let default_priority = self.db.config.default_standby_priority;
        let rec = self.record_mut(frame);
        rec.priority = default_priority;
        rec.usage = FrameUse::ColorChained {
            next: FrameIndex::EMPTY,
            prev: FrameIndex::EMPTY,
        };
        let color = rec.color;
        self.atomics(frame).reset_transient_flags();

        self.state.link(ListId::of(tier), frame, placement);
        self.state.link(list.list_id(color), frame, placement);
        let node = self.state.layout.node_of(color);
        self.state.node_counts[node as usize][list.index()] += 1;

        self.available_incremented();
        if list == ColoredList::Free {
            self.maybe_wake_zeroing(node);
        }
    }

    fn insert_modified(&mut self, frame: FrameIndex, placement: Placement) {
        let original = self.transition_backing(frame);
        self.atomics(frame).update_flags(|f| f.with_modified(true));

        if original.destined_for_paging_file() {
            let color = self.record(frame).color;
            self.state.link(ListId::ModifiedColor(color), frame, placement);
            self.state.modified.total += 1;
            self.state.pages_for_paging_file += 1;
        } else {
            self.state.link(ListId::Modified, frame, placement);
            if self.state.mapped_modified() == 1 && !self.state.mapped_write_timer_armed {
                self.state.mapped_write_timer_armed = true;
                self.db.collaborators.arm_mapped_write_timer();
            }
        }
        self.tally_transition(&original, true);

        let config = &self.db.config;
        let available = self.state.available;
        let modified = self.state.modified.total;
        if available < config.plenty_free_limit
            && (modified >= config.modified_page_maximum
                || (available < config.tight_limit && modified >= config.modified_write_cluster))
        {
            self.db.collaborators.wake_modified_writer();
        }
    }

    /// The deferred mapped-file write timer fired; the next file-backed
    /// modified page may arm it again.
    pub fn mapped_write_timer_expired(&mut self) {
        self.state.mapped_write_timer_armed = false;
    }

    /// Pops the head of `tier`. The tier must not be empty.
    ///
    /// Standby pages have their transition PTE restored and lose their
    /// backing descriptor; Modified pages keep it for the writer.
    pub fn remove_head(&mut self, tier: Tier) -> FrameIndex {
        let frame = match tier {
            Tier::Modified => self.first_modified(),
            _ => self.state.head(ListId::of(tier)).flink,
        };
        if frame.is_empty() {
            bug_check(ListCorruption::EmptyList(ListId::of(tier)));
        }

        match tier {
            Tier::Zeroed | Tier::Free => self.unlink_free_or_zero(frame),
            Tier::Standby(_) => {
                self.unlink_middle(frame);
                self.restore_pte(frame);
                self.atomics(frame).reset_transient_flags();
            }
            _ => self.unlink_middle(frame),
        }
        frame
    }

    fn first_modified(&self) -> FrameIndex {
        if self.state.modified.flink.is_empty() {
            self.state
                .modified_by_color
                .iter()
                .find(|h| h.total != 0)
                .map_or(FrameIndex::EMPTY, |h| h.flink)
        } else {
            self.state.modified.flink
        }
    }

    /// Takes `frame` off whichever of Standby, Modified, ModifiedNoWrite,
    /// Bad or Rom it is on.
    ///
    /// A frame that is off the lists with its write still in flight is left
    /// alone; the writer puts it back when the write completes.
    pub fn unlink_middle(&mut self, frame: FrameIndex) {
        let membership = self.record(frame).membership;
        let count = self.atomics(frame).reference_count();
        let share_count = self.record(frame).share_count;

        let tier = match membership {
            ListMembership::NotListed if count != 0 && share_count == 0 => return,
            ListMembership::Listed(tier) if !tier.is_colored() => tier,
            _ => bug_check(ListCorruption::NotUnlinkable { frame, membership }),
        };
        if count != 0 {
            bug_check(crate::BugCheck::PfnReferenceCount { frame, count });
        }
        if share_count != 0 {
            bug_check(MemoryManagement::ActiveOnTransitionList { frame, share_count });
        }

        log::trace!("unlink {frame} from {}", ListId::of(tier));
        match tier {
            Tier::Standby(priority) => {
                let original = self.transition_backing(frame);
                self.state.unlink(ListId::Standby(priority), frame);
                self.tally_transition(&original, false);
                self.available_decremented();
            }
            Tier::Modified => {
                let original = self.transition_backing(frame);
                if original.destined_for_paging_file() {
                    let color = self.record(frame).color;
                    self.state.unlink(ListId::ModifiedColor(color), frame);
                    self.state.modified.total -= 1;
                    self.state.pages_for_paging_file -= 1;
                } else {
                    self.state.unlink(ListId::Modified, frame);
                }
                self.tally_transition(&original, false);
            }
            Tier::ModifiedNoWrite => {
                let original = self.transition_backing(frame);
                self.state.unlink(ListId::ModifiedNoWrite, frame);
                self.tally_transition(&original, false);
            }
            Tier::Bad => self.state.unlink(ListId::Bad, frame),
            Tier::Rom => self.state.unlink(ListId::Rom, frame),
            Tier::Zeroed | Tier::Free => unreachable!("colored tiers are rejected above"),
        }
        self.record_mut(frame).membership = ListMembership::NotListed;
    }

    /// Takes `frame` off Free or Zeroed, wherever it sits, including its
    /// colored chain.
    pub fn unlink_free_or_zero(&mut self, frame: FrameIndex) {
        let membership = self.record(frame).membership;
        let Some(list) = membership.tier().and_then(ColoredList::of) else {
            bug_check(ListCorruption::NotUnlinkable { frame, membership });
        };

        log::trace!("unlink {frame} from {}", ListId::of(list.tier()));
        let color = self.record(frame).color;
        self.state.unlink(ListId::of(list.tier()), frame);
        self.state.unlink(list.list_id(color), frame);
        let node = self.state.layout.node_of(color) as usize;
        self.state.node_counts[node][list.index()] -= 1;

        let rec = self.record_mut(frame);
        rec.usage = FrameUse::Unowned;
        rec.membership = ListMembership::NotListed;
        self.atomics(frame).reset_transient_flags();
        self.available_decremented();
    }

    /// Standby and Modified pages must carry the descriptor their PTE is
    /// restored to; anything else means the record was overwritten.
    fn transition_backing(&self, frame: FrameIndex) -> BackingDescriptor {
        self.record(frame)
            .original()
            .unwrap_or_else(|| bug_check(MemoryManagement::TransitionBackingMismatch(frame)))
    }

    fn tally_transition(&mut self, original: &BackingDescriptor, added: bool) {
        let tally = if original.is_shared() {
            &mut self.state.transition_shared
        } else {
            &mut self.state.transition_private
        };
        if added {
            *tally += 1;
        } else {
            *tally -= 1;
        }
    }

    /// Hands a transition page back to its PTE and forgets the backing.
    pub(crate) fn restore_pte(&mut self, frame: FrameIndex) {
        let rec = self.record_mut(frame);
        let usage = core::mem::take(&mut rec.usage);
        if let FrameUse::Mapped {
            original,
            page_table,
        } = usage
        {
            self.db
                .collaborators
                .restore_transition_pte(frame, &original, page_table);
        }
    }

    /// Flags `frame` for removal and moves it to Bad if it currently sits on
    /// an available list. Frames in use move when they are released.
    pub fn request_removal(&mut self, frame: FrameIndex) {
        self.atomics(frame)
            .update_flags(|f| f.with_removal_requested(true));
        match self.record(frame).membership {
            ListMembership::Listed(Tier::Free | Tier::Zeroed) => {
                self.unlink_free_or_zero(frame);
                self.atomics(frame)
                    .update_flags(|f| f.with_removal_requested(true));
                self.insert_tail(Tier::Free, frame);
            }
            ListMembership::Listed(tier @ Tier::Standby(_)) => {
                self.unlink_middle(frame);
                self.insert_tail(tier, frame);
            }
            _ => {}
        }
    }

    /// Total of a tier's list head.
    #[must_use]
    pub fn total(&self, tier: Tier) -> u64 {
        self.state.head(ListId::of(tier)).total
    }

    /// Walks a list from head to tail. Intended for diagnostics and tests.
    #[must_use]
    pub fn list_frames(&self, id: ListId) -> Vec<FrameIndex> {
        let mut frames = Vec::new();
        let mut next = self.state.head(id).flink;
        while !next.is_empty() && frames.len() < self.state.records.len() {
            frames.push(next);
            next = self.state.links(id, next).flink;
        }
        frames
    }
}
