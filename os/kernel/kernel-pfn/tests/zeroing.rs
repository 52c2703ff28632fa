mod common;

use common::*;
use kernel_pfn::{FrameIndex, ListId, Tier, ZeroPageWorker};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn assert_unique(frames: &[FrameIndex]) {
    let unique: HashSet<_> = frames.iter().collect();
    assert_eq!(unique.len(), frames.len(), "a frame was zeroed twice");
}

#[test]
fn worker_converges_on_all_zeroed() {
    let db = database_with(small_config().with_zeroing(8, 10), 100);
    db.add_free_range(0..100);

    let mut worker = ZeroPageWorker::new();
    let mut batches = 0;
    loop {
        let zeroed = worker.zero_batch(&db);
        if zeroed == 0 {
            break;
        }
        assert!(zeroed <= 10);
        batches += 1;
    }

    assert_eq!(batches, 10);
    assert_eq!(worker.zeroed(), 100);
    let stats = db.stats();
    assert_eq!((stats.free, stats.zeroed, stats.available), (0, 100, 100));
    let zeroed = db.collaborators().zeroed_frames();
    assert_eq!(zeroed.len(), 100);
    assert_unique(&zeroed);
    db.lock().verify().unwrap();
}

#[test]
fn free_pages_wake_the_worker() {
    let db = database(32);
    let event = db.zeroing_event();
    db.add_free_range(0..7);
    assert!(!event.is_set());
    db.add_free_range(7..8);
    assert!(event.is_set());
    db.add_free_range(8..12);
    assert_eq!(event.set_count(), 1);

    // draining the list puts the worker back to sleep
    let mut worker = ZeroPageWorker::new();
    while worker.zero_batch(&db) != 0 {}
    assert!(event.try_wait());
    db.add_free_range(12..20);
    assert_eq!(event.set_count(), 2);
}

#[test]
fn background_worker_zeroes_and_stops() {
    let db = database(32);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let worker = s.spawn(|| ZeroPageWorker::new().run(&db, &stop, deadline(5)));

        db.add_free_range(0..20);
        while db.stats().zeroed < 20 {
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);
        assert_eq!(worker.join().unwrap(), 20);
    });

    assert_eq!(db.stats().free, 0);
    assert_unique(&db.collaborators().zeroed_frames());
}

#[test]
fn processors_zero_in_parallel_at_boot() {
    let db = database(256);
    db.add_free_range(0..256);

    let total: u64 = thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| s.spawn(|| ZeroPageWorker::new().zero_at_boot(&db)))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });

    assert_eq!(total, 256);
    let zeroed = db.collaborators().zeroed_frames();
    assert_eq!(zeroed.len(), 256);
    assert_unique(&zeroed);
    let stats = db.stats();
    assert_eq!((stats.free, stats.zeroed), (0, 256));
    db.lock().verify().unwrap();
}

#[test]
fn boot_zeroing_prepends() {
    let db = database(4);
    db.add_free_range(0..4);
    assert_eq!(ZeroPageWorker::new().zero_at_boot(&db), 4);
    assert_eq!(
        db.lock().list_frames(ListId::Zeroed),
        [frame(3), frame(2), frame(1), frame(0)]
    );
}

#[test]
fn runtime_zeroing_appends() {
    let db = database(4);
    db.add_free_range(0..4);
    assert_eq!(ZeroPageWorker::new().zero_batch(&db), 4);
    assert_eq!(
        db.lock().list_frames(ListId::Zeroed),
        [frame(0), frame(1), frame(2), frame(3)]
    );
}

#[test]
fn node_worker_only_touches_its_node() {
    let db = database_with(small_config().with_colors(4, 2), 16);
    db.add_free_range(0..16);
    assert_eq!(ZeroPageWorker::for_node(1).zero_at_boot(&db), 8);

    let g = db.lock();
    assert_eq!(g.node_totals(1), (8, 0));
    assert_eq!(g.node_totals(0), (0, 8));
    g.verify().unwrap();
    drop(g);
    assert!(
        db.collaborators()
            .zeroed_frames()
            .iter()
            .all(|f| f.as_u32() >= 8)
    );
}

#[test]
fn free_pages_wake_the_workers_of_their_node() {
    let db = database_with(small_config().with_colors(4, 2), 16);
    let node0 = db.node_zeroing_event(0).unwrap();
    let node1 = db.node_zeroing_event(1).unwrap();
    assert!(db.node_zeroing_event(2).is_none());

    db.add_free_range(8..16);
    assert!(!node0.is_set());
    assert!(node1.try_wait());
    assert!(db.zeroing_event().is_set());

    let mut worker = ZeroPageWorker::for_node(1);
    while worker.zero_batch(&db) != 0 {}
    assert_eq!(worker.zeroed(), 8);

    // the idle node 1 worker is not the one woken for node 0 pages
    db.add_free_range(0..8);
    assert!(node0.is_set());
    assert!(!node1.is_set());
    assert_eq!(ZeroPageWorker::for_node(1).zero_batch(&db), 0);
    assert_eq!(ZeroPageWorker::for_node(0).zero_batch(&db), 4);
}

#[test]
fn node_workers_run_side_by_side() {
    let db = database_with(small_config().with_colors(4, 2).with_zeroing(1, 4), 16);
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        let workers: Vec<_> = (0..2)
            .map(|node| {
                let (db, stop) = (&db, &stop);
                s.spawn(move || ZeroPageWorker::for_node(node).run(db, stop, deadline(10_000)))
            })
            .collect();

        db.add_free_range(8..16);
        while db.stats().zeroed < 8 {
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);
        db.set_zeroing_enabled(true);
        let zeroed: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(zeroed, [0, 8]);
    });
    db.lock().verify().unwrap();
}

#[test]
fn disabled_zeroing_leaves_free_pages_alone() {
    let db = database(16);
    db.set_zeroing_enabled(false);
    db.add_free_range(0..16);
    assert!(!db.zeroing_event().is_set());

    let mut worker = ZeroPageWorker::new();
    assert_eq!(worker.zero_batch(&db), 0);
    assert_eq!(db.lock().total(Tier::Free), 16);

    db.set_zeroing_enabled(true);
    assert!(db.zeroing_event().is_set());
    assert_eq!(worker.zero_batch(&db), 4);
}
