//! Structural consistency checks.

use crate::collab::Collaborators;
use crate::database::PfnGuard;
use crate::frame::{FrameIndex, PageColor};
use crate::list::{ColoredList, ListId};
use crate::record::{ListMembership, StandbyPriority, Tier};
use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("{list}: walked {walked} frames, head says {recorded}")]
    CountMismatch {
        list: ListId,
        walked: u64,
        recorded: u64,
    },
    #[error("{list}: link to frame {frame} points outside the database")]
    InvalidLink { list: ListId, frame: FrameIndex },
    #[error("{list}: frame {frame} has a broken back link")]
    BrokenBackLink { list: ListId, frame: FrameIndex },
    #[error("{list}: head's tail is {recorded}, walk ended at {walked}")]
    TailMismatch {
        list: ListId,
        walked: FrameIndex,
        recorded: FrameIndex,
    },
    #[error("{list}: frame {frame} is marked {membership:?}")]
    WrongMembership {
        list: ListId,
        frame: FrameIndex,
        membership: ListMembership,
    },
    #[error("frame {frame} is on {list} and {other}")]
    DuplicateFrame {
        frame: FrameIndex,
        list: ListId,
        other: ListId,
    },
    #[error("frame {frame} is marked {membership:?} but is on no list")]
    Unreachable {
        frame: FrameIndex,
        membership: ListMembership,
    },
    #[error("frame {frame} on {list} has reference count {count}")]
    ReferencedOnList {
        frame: FrameIndex,
        list: ListId,
        count: u16,
    },
    #[error("{list}: frame {frame} has color {actual}")]
    ColorMismatch {
        list: ListId,
        frame: FrameIndex,
        actual: PageColor,
    },
    #[error("{list}: colored lists hold {colored} frames, the list {recorded}")]
    ColoredTotalMismatch {
        list: ListId,
        colored: u64,
        recorded: u64,
    },
    #[error("node {node}: {list} count is {recorded}, {actual} frames found")]
    NodeCountMismatch {
        node: u32,
        list: ListId,
        recorded: u64,
        actual: u64,
    },
    #[error("{recorded} pages recorded available, lists hold {actual}")]
    AvailableMismatch { recorded: u64, actual: u64 },
    #[error("{recorded} pages recorded for the paging file, sub-lists hold {actual}")]
    PagingFileMismatch { recorded: u64, actual: u64 },
    #[error("{recorded} transition pages tallied, lists hold {actual}")]
    TransitionTallyMismatch { recorded: u64, actual: u64 },
}

impl<C: Collaborators> PfnGuard<'_, C> {
    /// Walks every list and checks it against its head, the records and the
    /// aggregate counters.
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        let layout = self.state.layout;
        let mut seen: Vec<Option<ListId>> = vec![None; self.state.records.len()];

        // Primary chains, each frame on exactly one.
        let mut primaries = vec![
            (ListId::Zeroed, Tier::Zeroed),
            (ListId::Free, Tier::Free),
            (ListId::ModifiedNoWrite, Tier::ModifiedNoWrite),
            (ListId::Bad, Tier::Bad),
            (ListId::Rom, Tier::Rom),
        ];
        primaries.extend(StandbyPriority::all().map(|p| (ListId::Standby(p), Tier::Standby(p))));
        for (list, tier) in primaries {
            let recorded = self.state.head(list).total;
            self.verify_chain(list, tier, recorded, &mut seen)?;
        }

        // Modified: main chain plus the per-color sub-lists.
        let mapped = self.state.mapped_modified();
        self.verify_chain(ListId::Modified, Tier::Modified, mapped, &mut seen)?;
        let mut paging_file = 0;
        for color in (0..layout.total_colors()).map(PageColor::from_raw) {
            let list = ListId::ModifiedColor(color);
            let recorded = self.state.head(list).total;
            self.verify_chain(list, Tier::Modified, recorded, &mut seen)?;
            paging_file += recorded;
        }
        if paging_file != self.state.pages_for_paging_file {
            return Err(ConsistencyError::PagingFileMismatch {
                recorded: self.state.pages_for_paging_file,
                actual: paging_file,
            });
        }

        self.verify_colored(&seen)?;

        for (frame, owner) in self.db.frames().zip(seen.iter()) {
            let membership = self.record(frame).membership;
            if owner.is_none() && matches!(membership, ListMembership::Listed(_)) {
                return Err(ConsistencyError::Unreachable { frame, membership });
            }
        }

        let actual = self.state.zeroed.total + self.state.free.total + self.state.standby_total();
        if actual != self.state.available {
            return Err(ConsistencyError::AvailableMismatch {
                recorded: self.state.available,
                actual,
            });
        }

        let transition = self.state.standby_total()
            + self.state.modified.total
            + self.state.modified_no_write.total;
        let tallied = self.state.transition_private + self.state.transition_shared;
        if transition != tallied {
            return Err(ConsistencyError::TransitionTallyMismatch {
                recorded: tallied,
                actual: transition,
            });
        }
        Ok(())
    }

    fn verify_chain(
        &self,
        list: ListId,
        tier: Tier,
        recorded: u64,
        seen: &mut [Option<ListId>],
    ) -> Result<(), ConsistencyError> {
        let mut walked = 0;
        let mut prev = FrameIndex::EMPTY;
        let mut next = self.state.head(list).flink;
        while !next.is_empty() {
            let frame = next;
            let Some(slot) = seen.get_mut(frame.as_usize()) else {
                return Err(ConsistencyError::InvalidLink { list, frame });
            };
            if let Some(other) = *slot {
                return Err(ConsistencyError::DuplicateFrame { frame, list, other });
            }
            *slot = Some(list);

            let links = self.state.links(list, frame);
            if links.blink != prev {
                return Err(ConsistencyError::BrokenBackLink { list, frame });
            }
            let membership = self.record(frame).membership;
            if membership != ListMembership::Listed(tier) {
                return Err(ConsistencyError::WrongMembership {
                    list,
                    frame,
                    membership,
                });
            }
            let count = self.atomics(frame).reference_count();
            if count != 0 {
                return Err(ConsistencyError::ReferencedOnList { frame, list, count });
            }

            walked += 1;
            if walked > recorded {
                break;
            }
            prev = frame;
            next = links.flink;
        }
        if walked != recorded {
            return Err(ConsistencyError::CountMismatch {
                list,
                walked,
                recorded,
            });
        }
        if self.state.head(list).blink != prev {
            return Err(ConsistencyError::TailMismatch {
                list,
                walked: prev,
                recorded: self.state.head(list).blink,
            });
        }
        Ok(())
    }

    /// Every Free/Zeroed frame is on exactly the colored chain of its color.
    fn verify_colored(&self, seen: &[Option<ListId>]) -> Result<(), ConsistencyError> {
        let layout = self.state.layout;
        for list in [ColoredList::Zeroed, ColoredList::Free] {
            let tier = list.tier();
            let mut per_node = vec![0u64; layout.nodes() as usize];
            let mut colored = 0;

            for color in (0..layout.total_colors()).map(PageColor::from_raw) {
                let id = list.list_id(color);
                let recorded = self.state.head(id).total;
                let mut walked = 0;
                let mut prev = FrameIndex::EMPTY;
                let mut next = self.state.head(id).flink;
                while !next.is_empty() && walked <= recorded {
                    let frame = next;
                    if frame.as_usize() >= seen.len() {
                        return Err(ConsistencyError::InvalidLink { list: id, frame });
                    }
                    let links = self.state.links(id, frame);
                    if links.blink != prev {
                        return Err(ConsistencyError::BrokenBackLink { list: id, frame });
                    }
                    if seen.get(frame.as_usize()).copied().flatten() != Some(ListId::of(tier)) {
                        return Err(ConsistencyError::WrongMembership {
                            list: id,
                            frame,
                            membership: self.record(frame).membership,
                        });
                    }
                    let actual = self.record(frame).color;
                    if actual != color {
                        return Err(ConsistencyError::ColorMismatch {
                            list: id,
                            frame,
                            actual,
                        });
                    }
                    walked += 1;
                    prev = frame;
                    next = links.flink;
                }
                if walked != recorded {
                    return Err(ConsistencyError::CountMismatch {
                        list: id,
                        walked,
                        recorded,
                    });
                }
                per_node[layout.node_of(color) as usize] += walked;
                colored += walked;
            }

            let recorded = self.state.head(ListId::of(tier)).total;
            if colored != recorded {
                return Err(ConsistencyError::ColoredTotalMismatch {
                    list: ListId::of(tier),
                    colored,
                    recorded,
                });
            }
            for (node, actual) in per_node.into_iter().enumerate() {
                let recorded = self.state.node_counts[node][list.index()];
                if recorded != actual {
                    return Err(ConsistencyError::NodeCountMismatch {
                        node: u32::try_from(node).unwrap_or(u32::MAX),
                        list: ListId::of(tier),
                        recorded,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}
