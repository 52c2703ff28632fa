//! Counters snapshot.

use crate::collab::Collaborators;
use crate::database::{PageFrameDatabase, PfnGuard};
use crate::record::{STANDBY_PRIORITIES, StandbyPriority, Tier};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PfnStats {
    pub zeroed: u64,
    pub free: u64,
    pub standby: [u64; STANDBY_PRIORITIES],
    pub modified: u64,
    pub modified_no_write: u64,
    pub bad: u64,
    pub rom: u64,
    pub available: u64,
    pub pages_for_paging_file: u64,
    pub standby_repurposed: u64,
    pub transition_private: u64,
    pub transition_shared: u64,
    pub low_event_sets: u32,
    pub high_event_sets: u32,
    pub system_lock_pages: u64,
    pub resident_available: i64,
}

impl PfnStats {
    #[must_use]
    pub fn standby_total(&self) -> u64 {
        self.standby.iter().sum()
    }
}

impl<C: Collaborators> PfnGuard<'_, C> {
    #[must_use]
    pub fn stats(&self) -> PfnStats {
        let mut standby = [0; STANDBY_PRIORITIES];
        for priority in StandbyPriority::all() {
            standby[priority.as_usize()] = self.total(Tier::Standby(priority));
        }
        PfnStats {
            zeroed: self.total(Tier::Zeroed),
            free: self.total(Tier::Free),
            standby,
            modified: self.total(Tier::Modified),
            modified_no_write: self.total(Tier::ModifiedNoWrite),
            bad: self.total(Tier::Bad),
            rom: self.total(Tier::Rom),
            available: self.state.available,
            pages_for_paging_file: self.state.pages_for_paging_file,
            standby_repurposed: self.state.standby_repurposed,
            transition_private: self.state.transition_private,
            transition_shared: self.state.transition_shared,
            low_event_sets: self.db.events.low().set_count(),
            high_event_sets: self.db.events.high().set_count(),
            system_lock_pages: self.db.system_lock_pages(),
            resident_available: self.db.resident_available(),
        }
    }
}

impl<C: Collaborators> PageFrameDatabase<C> {
    #[must_use]
    pub fn stats(&self) -> PfnStats {
        self.lock().stats()
    }
}
