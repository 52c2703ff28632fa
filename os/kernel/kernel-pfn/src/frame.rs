//! Frame indices, page colors and color cursors.
//!
//! A page color is a composite of the NUMA node and the secondary (cache)
//! color of a physical page:
//!
//! ```text
//!  31                 shift  shift-1           0
//! +----------------------+--------------------+
//! |        node          |  secondary color   |
//! +----------------------+--------------------+
//! ```
//!
//! `shift` is log2 of the number of secondary colors, which must be a power
//! of two. The composite value doubles as the index into the colored lists.

use core::fmt;

/// Index of a physical page frame in the database.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameIndex(u32);

impl FrameIndex {
    /// Link terminator.
    pub const EMPTY: Self = Self(u32::MAX);

    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        debug_assert!(index != u32::MAX, "u32::MAX is the EMPTY sentinel");
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("FrameIndex(EMPTY)")
        } else {
            write!(f, "FrameIndex({:#x})", self.0)
        }
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("EMPTY")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Composite NUMA node and secondary color. See the module docs.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageColor(u32);

impl PageColor {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PageColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "color {}", self.0)
    }
}

/// Shape of the color space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ColorLayout {
    secondary_colors: u32,
    nodes: u32,
}

impl ColorLayout {
    /// Unchecked; see [`validate`](Self::validate).
    #[must_use]
    pub const fn new(secondary_colors: u32, nodes: u32) -> Self {
        Self {
            secondary_colors,
            nodes,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.secondary_colors.is_power_of_two()
            && self.nodes != 0
            && self.secondary_colors.checked_mul(self.nodes).is_some()
    }

    #[inline]
    #[must_use]
    pub const fn secondary_colors(&self) -> u32 {
        self.secondary_colors
    }

    #[inline]
    #[must_use]
    pub const fn nodes(&self) -> u32 {
        self.nodes
    }

    #[inline]
    #[must_use]
    pub const fn is_numa(&self) -> bool {
        self.nodes > 1
    }

    #[inline]
    #[must_use]
    pub const fn total_colors(&self) -> u32 {
        self.secondary_colors * self.nodes
    }

    #[inline]
    const fn shift(&self) -> u32 {
        self.secondary_colors.trailing_zeros()
    }

    #[inline]
    const fn mask(&self) -> u32 {
        self.secondary_colors - 1
    }

    #[inline]
    #[must_use]
    pub const fn compose(&self, node: u32, secondary: u32) -> PageColor {
        PageColor((node << self.shift()) | (secondary & self.mask()))
    }

    #[inline]
    #[must_use]
    pub const fn node_of(&self, color: PageColor) -> u32 {
        color.0 >> self.shift()
    }

    #[inline]
    #[must_use]
    pub const fn secondary_of(&self, color: PageColor) -> u32 {
        color.0 & self.mask()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, color: PageColor) -> bool {
        color.0 < self.total_colors()
    }

    /// The next secondary color on the same node, wrapping.
    #[inline]
    #[must_use]
    pub const fn next_on_node(&self, color: PageColor) -> PageColor {
        self.compose(self.node_of(color), self.secondary_of(color) + 1)
    }

    /// Default color for a frame when the caller doesn't supply one: frames
    /// are split evenly across nodes in physical order, and the secondary
    /// color is the frame number modulo the number of secondary colors.
    #[must_use]
    pub fn color_for_frame(&self, frame: FrameIndex, frame_count: u32) -> PageColor {
        let node = if frame_count == 0 {
            0
        } else {
            let spread = u64::from(frame.0) * u64::from(self.nodes) / u64::from(frame_count);
            u32::try_from(spread).map_or(self.nodes - 1, |n| n.min(self.nodes - 1))
        };
        self.compose(node, frame.0)
    }
}

impl Default for ColorLayout {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SECONDARY_COLORS, 1)
    }
}

/// Per allocation context round-robin over colors.
///
/// Every context owns its cursor, so spreading allocations over the cache
/// doesn't need a shared counter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ColorCursor {
    node: Option<u32>,
    next: u32,
}

impl ColorCursor {
    /// Rotates over the secondary colors of one node.
    #[must_use]
    pub const fn for_node(node: u32) -> Self {
        Self {
            node: Some(node),
            next: 0,
        }
    }

    /// Rotates over every color of every node.
    #[must_use]
    pub const fn all_nodes() -> Self {
        Self {
            node: None,
            next: 0,
        }
    }

    /// The node the cursor is confined to, if any.
    #[must_use]
    pub const fn node(&self) -> Option<u32> {
        self.node
    }

    /// Number of distinct colors the cursor visits.
    #[must_use]
    pub const fn span(&self, layout: &ColorLayout) -> u32 {
        match self.node {
            Some(_) => layout.secondary_colors(),
            None => layout.total_colors(),
        }
    }

    /// Returns the current color and advances.
    pub const fn next_color(&mut self, layout: &ColorLayout) -> PageColor {
        match self.node {
            Some(node) => {
                let color = layout.compose(node, self.next);
                self.next = (self.next + 1) & layout.mask();
                color
            }
            None => {
                let color = PageColor(self.next % layout.total_colors());
                self.next = (color.0 + 1) % layout.total_colors();
                color
            }
        }
    }
}
