//! Allocation engine.
//!
//! | Request            | Search order                                                     |
//! |--------------------|------------------------------------------------------------------|
//! | `remove_any_page`  | Free/Zeroed by color (node-local), Free, Zeroed, Standby 0..7    |
//! | `remove_zero_page` | Zeroed by color (node-local), Free by color on NUMA, Zeroed, Free, Standby 0..7 |
//!
//! Both hand out pages that are unlisted, unreferenced and unmapped. The
//! caller must have made sure a page is available, typically through
//! [`ensure_available_or_wait`](PfnGuard::ensure_available_or_wait); running
//! dry regardless is fatal.

use crate::bugcheck::{ListCorruption, MemoryManagement, bug_check};
use crate::collab::Collaborators;
use crate::database::PfnGuard;
use crate::frame::{FrameIndex, PageColor};
use crate::list::ColoredList;
use crate::record::{ListMembership, StandbyPriority, Tier};

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Takes any page, preferring `color`. Never zeroes.
    pub fn remove_any_page(&mut self, color: PageColor) -> FrameIndex {
        if let Some(frame) = self.take_local_any(color) {
            return frame;
        }
        if let Some(frame) = self.take_head(Tier::Free) {
            return frame;
        }
        if let Some(frame) = self.take_head(Tier::Zeroed) {
            return frame;
        }
        if let Some(frame) = self.take_standby() {
            return frame;
        }
        bug_check(ListCorruption::NothingAvailable)
    }

    /// Takes a page and guarantees it is zero-filled, preferring `color`.
    ///
    /// Pages that come from Free or Standby are zeroed here, with the PFN
    /// lock released around the zeroing.
    pub fn remove_zero_page(&mut self, color: PageColor) -> FrameIndex {
        let (frame, needs_zeroing) = self.take_for_zeroing(color);
        if needs_zeroing {
            let db = self.db;
            self.unlocked(|| db.collaborators.zero_frame(frame));

            // Off every list and unreferenced, so nobody may have touched it.
            let membership = self.record(frame).membership;
            if membership != ListMembership::NotListed
                || self.atomics(frame).reference_count() != 0
            {
                bug_check(MemoryManagement::StateChangedWhileUnlocked(frame));
            }
        }
        frame
    }

    fn take_for_zeroing(&mut self, color: PageColor) -> (FrameIndex, bool) {
        if self.state.layout.is_numa() {
            if let Some(found) = self.take_numa_for_zeroing(color) {
                return found;
            }
        } else if let Some(frame) = self.take_colored(ColoredList::Zeroed, color) {
            return (frame, false);
        }

        if let Some(frame) = self.take_head(Tier::Zeroed) {
            return (frame, false);
        }
        if !self.state.layout.is_numa() {
            if let Some(frame) = self.take_colored(ColoredList::Free, color) {
                return (frame, true);
            }
        }
        if let Some(frame) = self.take_head(Tier::Free) {
            return (frame, true);
        }
        if let Some(frame) = self.take_standby() {
            return (frame, true);
        }
        bug_check(ListCorruption::NothingAvailable)
    }

    /// Local zeroed pages, then local free pages (zeroing one locally beats
    /// touching remote memory), before anything crosses nodes.
    fn take_numa_for_zeroing(&mut self, color: PageColor) -> Option<(FrameIndex, bool)> {
        if let Some(frame) = self.take_node_local(ColoredList::Zeroed, color) {
            return Some((frame, false));
        }
        self.take_node_local(ColoredList::Free, color)
            .map(|frame| (frame, true))
    }

    /// Free then Zeroed for each color of the node, starting at `color`.
    fn take_local_any(&mut self, color: PageColor) -> Option<FrameIndex> {
        let layout = self.state.layout;
        if !layout.contains(color) {
            return None;
        }
        let node = layout.node_of(color);
        let local = if layout.is_numa() {
            self.node_count(node, ColoredList::Free) + self.node_count(node, ColoredList::Zeroed)
        } else {
            0
        };

        let mut next = color;
        for _ in 0..layout.secondary_colors() {
            if let Some(frame) = self.take_colored(ColoredList::Free, next) {
                return Some(frame);
            }
            if let Some(frame) = self.take_colored(ColoredList::Zeroed, next) {
                return Some(frame);
            }
            if local == 0 {
                break;
            }
            next = layout.next_on_node(next);
        }
        None
    }

    fn take_head(&mut self, tier: Tier) -> Option<FrameIndex> {
        (self.total(tier) != 0).then(|| self.remove_head(tier))
    }

    /// Repurposes the oldest page of the lowest non-empty Standby priority.
    fn take_standby(&mut self) -> Option<FrameIndex> {
        let priority = StandbyPriority::all().find(|p| self.total(Tier::Standby(*p)) != 0)?;
        let frame = self.remove_head(Tier::Standby(priority));
        self.state.standby_repurposed += 1;
        Some(frame)
    }
}

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Moves every Standby page to Free, handing each back to its PTE.
    /// Returns the number of pages purged.
    pub fn purge_transition_list(&mut self) -> u64 {
        let mut purged = 0;
        for priority in StandbyPriority::all() {
            while self.total(Tier::Standby(priority)) != 0 {
                let frame = self.remove_head(Tier::Standby(priority));
                self.insert_tail(Tier::Free, frame);
                purged += 1;
            }
        }
        log::debug!("purged {purged} standby pages");
        purged
    }
}
