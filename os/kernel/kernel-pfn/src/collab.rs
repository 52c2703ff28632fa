//! Seams to the rest of the memory manager.
//!
//! The database calls these with the PFN lock held unless noted otherwise,
//! so implementations must not call back into the database.

use crate::frame::FrameIndex;
use crate::record::{BackingDescriptor, FileId};

/// Page-table layer.
pub trait TransitionPtes {
    /// `frame` is being repurposed: point the PTE that still refers to it
    /// back at `original`.
    fn restore_transition_pte(
        &self,
        frame: FrameIndex,
        original: &BackingDescriptor,
        page_table: Option<FrameIndex>,
    );
}

/// Paging-file space manager.
pub trait BackingStore {
    fn release_backing_space(&self, original: &BackingDescriptor);
}

/// Fills a frame with zeroes through a scratch mapping. Called without the PFN lock.
pub trait FrameZeroing {
    fn zero_frame(&self, frame: FrameIndex);
}

/// Modified page writer and working-set trimmer.
pub trait WriterSignals {
    fn wake_modified_writer(&self) {}

    fn arm_mapped_write_timer(&self) {}

    /// Available pages dropped below the minimum; trim working sets.
    fn obtain_free_pages(&self) {}

    /// The dirty pages of `file` were dropped without being written.
    fn report_discarded_writes(&self, file: FileId, pages: u64) {
        let _ = (file, pages);
    }
}

pub trait Collaborators: TransitionPtes + BackingStore + FrameZeroing + WriterSignals {}

impl<T> Collaborators for T where T: TransitionPtes + BackingStore + FrameZeroing + WriterSignals {}
