//! Tunables of the page-frame database.
//!
//! | Constant                         | Default | Meaning                                        |
//! |----------------------------------|--------:|------------------------------------------------|
//! | [`LOW_LIMIT`]                    |       2 | memory makers wait until this many pages exist |
//! | [`HIGH_LIMIT`]                   |     128 | ordinary allocators wait for this many         |
//! | [`TIGHT_LIMIT`]                  |     256 | below this, small modified backlogs get written|
//! | [`PLENTY_FREE_LIMIT`]            |    1024 | below this, large modified backlogs get written|
//! | [`MINIMUM_FREE_PAGES_TO_ZERO`]   |       8 | Free pages needed to wake the zero worker      |
//! | [`ZERO_CLUSTER_PAGES`]           |      16 | pages zeroed per worker batch                  |
//! | [`STARVATION_TIMEOUT_MS`]        |   70000 | wait before last-chance recovery               |

use crate::frame::ColorLayout;
use crate::record::StandbyPriority;

pub const LOW_LIMIT: u64 = 2;
pub const HIGH_LIMIT: u64 = 128;
pub const TIGHT_LIMIT: u64 = 256;
pub const PLENTY_FREE_LIMIT: u64 = 1024;

pub const MINIMUM_FREE_PAGES: u64 = 26;
pub const MINIMUM_FREE_PAGES_TO_ZERO: u64 = 8;

pub const ZERO_CLUSTER_PAGES: usize = 16;
/// Upper bound for [`PfnConfig::zero_cluster_pages`]; the worker batches on the stack.
pub const MAX_ZERO_CLUSTER_PAGES: usize = 64;

pub const MODIFIED_PAGE_MAXIMUM: u64 = 1000;
pub const MODIFIED_WRITE_CLUSTER: u64 = 16;

/// 32 MiB of 4 KiB pages.
pub const LOW_MEMORY_THRESHOLD: u64 = 8 * 1024;
pub const HIGH_MEMORY_THRESHOLD: u64 = 3 * LOW_MEMORY_THRESHOLD;

pub const DEFAULT_SECONDARY_COLORS: u32 = 64;
pub const DEFAULT_STANDBY_PRIORITY: StandbyPriority = StandbyPriority::new_const(5);

pub const STARVATION_TIMEOUT_MS: u64 = 70_000;

const _: () = {
    assert!(LOW_LIMIT < HIGH_LIMIT);
    assert!(HIGH_LIMIT < TIGHT_LIMIT);
    assert!(TIGHT_LIMIT < PLENTY_FREE_LIMIT);
    assert!(LOW_MEMORY_THRESHOLD < HIGH_MEMORY_THRESHOLD);
    assert!(ZERO_CLUSTER_PAGES <= MAX_ZERO_CLUSTER_PAGES);
    assert!(DEFAULT_SECONDARY_COLORS.is_power_of_two());
};

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("secondary colors must be a nonzero power of two, got {0}")]
    SecondaryColors(u32),
    #[error("at least one NUMA node is required")]
    NoNodes,
    #[error("{secondary} secondary colors on {nodes} nodes overflow the color space")]
    ColorSpace { secondary: u32, nodes: u32 },
    #[error("low limit {low} must be nonzero and below high limit {high}")]
    WaitLimits { low: u64, high: u64 },
    #[error("writer limits must rise above the high limit: {high} < {tight} < {plenty}")]
    WriterLimits { high: u64, tight: u64, plenty: u64 },
    #[error("low memory threshold {low} must be nonzero and below high threshold {high}")]
    MemoryThresholds { low: u64, high: u64 },
    #[error("zero cluster must be between 1 and {max} pages, got {pages}")]
    ZeroCluster { pages: usize, max: usize },
    #[error("frame count {0} does not fit the database")]
    FrameCount(u64),
    #[error("color {color} is outside the {total} configured colors")]
    ColorOutOfRange { color: u32, total: u32 },
}

/// Which file loses its dirty pages when the system is starving.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum VictimSelection {
    /// The file owning the first eligible page on the modified list.
    #[default]
    FirstFound,
    /// The file with the most eligible pages on the modified list.
    MostModifiedPages,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PfnConfig {
    pub colors: ColorLayout,
    pub low_limit: u64,
    pub high_limit: u64,
    pub tight_limit: u64,
    pub plenty_free_limit: u64,
    pub low_memory_threshold: u64,
    pub high_memory_threshold: u64,
    pub minimum_free_pages: u64,
    pub minimum_free_pages_to_zero: u64,
    pub zero_cluster_pages: usize,
    pub modified_page_maximum: u64,
    pub modified_write_cluster: u64,
    pub default_standby_priority: StandbyPriority,
    pub starvation_timeout_ms: u64,
    pub victim_selection: VictimSelection,
    /// Return from a hopeless last-chance pass instead of halting.
    pub march_on: bool,
    /// Resident-available budget; `None` means one page per frame.
    pub resident_available: Option<u64>,
}

impl Default for PfnConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PfnConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            colors: ColorLayout::new(DEFAULT_SECONDARY_COLORS, 1),
            low_limit: LOW_LIMIT,
            high_limit: HIGH_LIMIT,
            tight_limit: TIGHT_LIMIT,
            plenty_free_limit: PLENTY_FREE_LIMIT,
            low_memory_threshold: LOW_MEMORY_THRESHOLD,
            high_memory_threshold: HIGH_MEMORY_THRESHOLD,
            minimum_free_pages: MINIMUM_FREE_PAGES,
            minimum_free_pages_to_zero: MINIMUM_FREE_PAGES_TO_ZERO,
            zero_cluster_pages: ZERO_CLUSTER_PAGES,
            modified_page_maximum: MODIFIED_PAGE_MAXIMUM,
            modified_write_cluster: MODIFIED_WRITE_CLUSTER,
            default_standby_priority: DEFAULT_STANDBY_PRIORITY,
            starvation_timeout_ms: STARVATION_TIMEOUT_MS,
            victim_selection: VictimSelection::FirstFound,
            march_on: false,
            resident_available: None,
        }
    }

    #[must_use]
    pub const fn with_colors(mut self, secondary_colors: u32, nodes: u32) -> Self {
        self.colors = ColorLayout::new(secondary_colors, nodes);
        self
    }

    #[must_use]
    pub const fn with_wait_limits(mut self, low: u64, high: u64) -> Self {
        self.low_limit = low;
        self.high_limit = high;
        self
    }

    #[must_use]
    pub const fn with_memory_thresholds(mut self, low: u64, high: u64) -> Self {
        self.low_memory_threshold = low;
        self.high_memory_threshold = high;
        self
    }

    #[must_use]
    pub const fn with_writer_limits(mut self, tight: u64, plenty: u64) -> Self {
        self.tight_limit = tight;
        self.plenty_free_limit = plenty;
        self
    }

    #[must_use]
    pub const fn with_minimum_free_pages(mut self, pages: u64) -> Self {
        self.minimum_free_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_zeroing(mut self, minimum_free_to_zero: u64, cluster_pages: usize) -> Self {
        self.minimum_free_pages_to_zero = minimum_free_to_zero;
        self.zero_cluster_pages = cluster_pages;
        self
    }

    #[must_use]
    pub const fn with_modified_limits(mut self, maximum: u64, write_cluster: u64) -> Self {
        self.modified_page_maximum = maximum;
        self.modified_write_cluster = write_cluster;
        self
    }

    #[must_use]
    pub const fn with_victim_selection(mut self, selection: VictimSelection) -> Self {
        self.victim_selection = selection;
        self
    }

    #[must_use]
    pub const fn with_march_on(mut self, march_on: bool) -> Self {
        self.march_on = march_on;
        self
    }

    #[must_use]
    pub const fn with_resident_available(mut self, pages: u64) -> Self {
        self.resident_available = Some(pages);
        self
    }

    pub const fn validate(&self) -> Result<(), ConfigError> {
        let secondary = self.colors.secondary_colors();
        if !secondary.is_power_of_two() {
            return Err(ConfigError::SecondaryColors(secondary));
        }
        if self.colors.nodes() == 0 {
            return Err(ConfigError::NoNodes);
        }
        if !self.colors.is_valid() {
            return Err(ConfigError::ColorSpace {
                secondary,
                nodes: self.colors.nodes(),
            });
        }
        if self.low_limit == 0 || self.low_limit >= self.high_limit {
            return Err(ConfigError::WaitLimits {
                low: self.low_limit,
                high: self.high_limit,
            });
        }
        // the writer trigger tests the tight limit only below the plenty limit
        if self.high_limit >= self.tight_limit || self.tight_limit >= self.plenty_free_limit {
            return Err(ConfigError::WriterLimits {
                high: self.high_limit,
                tight: self.tight_limit,
                plenty: self.plenty_free_limit,
            });
        }
        if self.low_memory_threshold == 0 || self.low_memory_threshold >= self.high_memory_threshold
        {
            return Err(ConfigError::MemoryThresholds {
                low: self.low_memory_threshold,
                high: self.high_memory_threshold,
            });
        }
        if self.zero_cluster_pages == 0 || self.zero_cluster_pages > MAX_ZERO_CLUSTER_PAGES {
            return Err(ConfigError::ZeroCluster {
                pages: self.zero_cluster_pages,
                max: MAX_ZERO_CLUSTER_PAGES,
            });
        }
        Ok(())
    }
}
