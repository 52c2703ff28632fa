//! Colored lookups on Free and Zeroed.

use crate::bugcheck::{MemoryManagement, bug_check};
use crate::collab::Collaborators;
use crate::database::PfnGuard;
use crate::frame::{FrameIndex, PageColor};
use crate::list::ColoredList;
use crate::record::Tier;

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Takes the first Free or Zeroed page of exactly `color`.
    pub fn remove_by_color(&mut self, tier: Tier, color: PageColor) -> Option<FrameIndex> {
        let Some(list) = ColoredList::of(tier) else {
            bug_check(MemoryManagement::UnsupportedOperation(tier));
        };
        self.take_colored(list, color)
    }

    /// Takes a page of `color` from `tier` or, failing that, from the other
    /// of Free and Zeroed. On NUMA systems the other colors of the node are
    /// tried next, again `tier` first. Only then does the head of `tier` go
    /// out.
    ///
    /// The tier must not be empty.
    pub fn remove_any_color(&mut self, tier: Tier, color: PageColor) -> FrameIndex {
        let Some(list) = ColoredList::of(tier) else {
            bug_check(MemoryManagement::UnsupportedOperation(tier));
        };
        let found = self
            .take_colored(list, color)
            .or_else(|| self.take_colored(list.other(), color))
            .or_else(|| self.take_node_local(list, color))
            .or_else(|| self.take_node_local(list.other(), color));
        match found {
            Some(frame) => frame,
            None => self.remove_head(tier),
        }
    }

    pub(crate) fn take_colored(&mut self, list: ColoredList, color: PageColor) -> Option<FrameIndex> {
        if !self.state.layout.contains(color) {
            return None;
        }
        let frame = self.state.head(list.list_id(color)).flink;
        if frame.is_empty() {
            return None;
        }
        self.unlink_free_or_zero(frame);
        Some(frame)
    }

    /// `color` first; on NUMA systems then every other secondary color of
    /// the node, as long as the node has pages of this kind at all.
    pub(crate) fn take_node_local(&mut self, list: ColoredList, color: PageColor) -> Option<FrameIndex> {
        if let Some(frame) = self.take_colored(list, color) {
            return Some(frame);
        }
        let layout = self.state.layout;
        if !layout.is_numa() || !layout.contains(color) {
            return None;
        }
        if self.node_count(layout.node_of(color), list) == 0 {
            return None;
        }
        let mut next = color;
        for _ in 1..layout.secondary_colors() {
            next = layout.next_on_node(next);
            if let Some(frame) = self.take_colored(list, next) {
                return Some(frame);
            }
        }
        None
    }

    #[inline]
    pub(crate) fn node_count(&self, node: u32, list: ColoredList) -> u64 {
        self.state.node_counts[node as usize][list.index()]
    }

    /// Pages of `tier` with the given color.
    #[must_use]
    pub fn color_total(&self, tier: Tier, color: PageColor) -> u64 {
        match ColoredList::of(tier) {
            Some(list) if self.state.layout.contains(color) => {
                self.state.head(list.list_id(color)).total
            }
            _ => 0,
        }
    }

    /// Free and Zeroed pages on a NUMA node.
    #[must_use]
    pub fn node_totals(&self, node: u32) -> (u64, u64) {
        self.state
            .node_counts
            .get(node as usize)
            .map_or((0, 0), |c| {
                (c[ColoredList::Zeroed.index()], c[ColoredList::Free.index()])
            })
    }
}
