#![allow(dead_code)]

use kernel_pfn::{
    BackingDescriptor, BackingStore, FileId, FrameIndex, FrameZeroing, PageColor,
    PageFrameDatabase, PfnConfig, TransitionPtes, WriterSignals,
};
use kernel_sync::Timeout;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Records every collaborator call.
#[derive(Default)]
pub struct Recorder {
    pub restored: Mutex<Vec<(FrameIndex, BackingDescriptor, Option<FrameIndex>)>>,
    pub released: Mutex<Vec<BackingDescriptor>>,
    pub zeroed: Mutex<Vec<FrameIndex>>,
    pub discarded: Mutex<Vec<(FileId, u64)>>,
    pub writer_wakeups: AtomicUsize,
    pub timer_arms: AtomicUsize,
    pub trims: AtomicUsize,
}

impl Recorder {
    pub fn restored_frames(&self) -> Vec<FrameIndex> {
        self.restored.lock().unwrap().iter().map(|r| r.0).collect()
    }

    pub fn zeroed_frames(&self) -> Vec<FrameIndex> {
        self.zeroed.lock().unwrap().clone()
    }

    pub fn writer_wakeups(&self) -> usize {
        self.writer_wakeups.load(Ordering::SeqCst)
    }

    pub fn timer_arms(&self) -> usize {
        self.timer_arms.load(Ordering::SeqCst)
    }
}

impl TransitionPtes for Recorder {
    fn restore_transition_pte(
        &self,
        frame: FrameIndex,
        original: &BackingDescriptor,
        page_table: Option<FrameIndex>,
    ) {
        self.restored
            .lock()
            .unwrap()
            .push((frame, *original, page_table));
    }
}

impl BackingStore for Recorder {
    fn release_backing_space(&self, original: &BackingDescriptor) {
        self.released.lock().unwrap().push(*original);
    }
}

impl FrameZeroing for Recorder {
    fn zero_frame(&self, frame: FrameIndex) {
        self.zeroed.lock().unwrap().push(frame);
    }
}

impl WriterSignals for Recorder {
    fn wake_modified_writer(&self) {
        self.writer_wakeups.fetch_add(1, Ordering::SeqCst);
    }

    fn arm_mapped_write_timer(&self) {
        self.timer_arms.fetch_add(1, Ordering::SeqCst);
    }

    fn obtain_free_pages(&self) {
        self.trims.fetch_add(1, Ordering::SeqCst);
    }

    fn report_discarded_writes(&self, file: FileId, pages: u64) {
        self.discarded.lock().unwrap().push((file, pages));
    }
}

pub struct Deadline(Instant);

impl Timeout for Deadline {
    fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    fn relax(&self) {
        thread::yield_now();
    }
}

pub fn deadline(ms: u64) -> impl FnMut() -> Deadline {
    move || Deadline(Instant::now() + Duration::from_millis(ms))
}

/// Four colors on one node, small limits.
pub fn small_config() -> PfnConfig {
    PfnConfig::new()
        .with_colors(4, 1)
        .with_wait_limits(2, 8)
        .with_memory_thresholds(4, 12)
        .with_minimum_free_pages(0)
        .with_zeroing(8, 4)
}

pub fn database(frames: u32) -> PageFrameDatabase<Recorder> {
    PageFrameDatabase::new(small_config(), frames, Recorder::default()).unwrap()
}

pub fn database_with(config: PfnConfig, frames: u32) -> PageFrameDatabase<Recorder> {
    PageFrameDatabase::new(config, frames, Recorder::default()).unwrap()
}

pub fn colored_database(colors: &[u32]) -> PageFrameDatabase<Recorder> {
    PageFrameDatabase::with_frame_colors(
        small_config(),
        colors.iter().copied().map(PageColor::from_raw),
        Recorder::default(),
    )
    .unwrap()
}

pub fn frame(index: u32) -> FrameIndex {
    FrameIndex::new(index)
}

pub fn mapped(file: u32, offset: u64) -> BackingDescriptor {
    BackingDescriptor::MappedFile {
        file: FileId(file),
        offset,
        image: false,
    }
}

pub fn paging(offset: u64) -> BackingDescriptor {
    BackingDescriptor::PagingFile { file: 0, offset }
}

/// Maps an unlisted frame and unmaps it again, leaving a transition page on
/// Standby (clean) or Modified (dirty).
pub fn make_transition(
    db: &PageFrameDatabase<Recorder>,
    f: FrameIndex,
    original: BackingDescriptor,
    modified: bool,
) {
    let mut g = db.lock();
    g.initialize_frame(f, original, None, modified);
    g.decrement_share_count(f);
}

/// Tiny deterministic generator for operation sequences.
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }

    pub fn index(&mut self, len: usize) -> usize {
        usize::try_from(self.next(len as u64)).unwrap()
    }

    pub fn color(&mut self, colors: u32) -> u32 {
        u32::try_from(self.next(u64::from(colors))).unwrap()
    }
}
