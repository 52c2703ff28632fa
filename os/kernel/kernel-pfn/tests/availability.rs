mod common;

use common::*;
use kernel_pfn::{
    BackingDescriptor, FileId, PageColor, PageFrameDatabase, StandbyPriority, Tier,
    VictimSelection, WaitKind,
};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

fn take(db: &PageFrameDatabase<Recorder>, pages: usize) {
    let mut g = db.lock();
    for _ in 0..pages {
        g.remove_any_page(PageColor::from_raw(0));
    }
}

fn image(file: u32, offset: u64) -> BackingDescriptor {
    BackingDescriptor::MappedFile {
        file: FileId(file),
        offset,
        image: true,
    }
}

#[test]
fn events_follow_the_available_count() {
    let db = database(16);
    let events = db.events();
    assert!(events.low_memory().is_set());
    assert!(!events.low().is_set());

    db.add_free_range(0..16);
    assert!(events.low().is_set());
    assert!(events.high().is_set());
    assert!(events.high_memory().is_set());
    assert!(!events.low_memory().is_set());
    let stats = db.stats();
    assert_eq!((stats.low_event_sets, stats.high_event_sets), (1, 1));

    take(&db, 5);
    assert!(!events.high_memory().is_set());
    assert!(events.high().is_set());

    take(&db, 1);
    assert_eq!(db.stats().available, 10);
    take(&db, 3);
    assert!(!events.high().is_set());
    assert!(!events.low_memory().is_set());

    take(&db, 4);
    assert_eq!(db.stats().available, 3);
    assert!(events.low_memory().is_set());
    assert!(events.low().is_set());

    take(&db, 2);
    assert!(!events.low().is_set());

    // back up again; every crossing sets exactly once
    db.add_free_range(0..5);
    let stats = db.stats();
    assert_eq!(stats.available, 6);
    assert_eq!((stats.low_event_sets, stats.high_event_sets), (2, 1));
    assert!(!events.low_memory().is_set());
}

#[test]
fn trimming_is_requested_below_the_minimum() {
    let db = database_with(small_config().with_minimum_free_pages(4), 8);
    db.add_free_range(0..8);
    take(&db, 4);
    assert_eq!(db.collaborators().trims.load(Ordering::SeqCst), 0);
    take(&db, 2);
    assert_eq!(db.collaborators().trims.load(Ordering::SeqCst), 2);
}

#[test]
fn no_wait_with_enough_pages() {
    let db = database(16);
    db.add_free_range(0..8);
    let mut g = db.lock();
    assert!(!g.ensure_available_or_wait(WaitKind::Ordinary, deadline(1)));
    g.remove_any_page(PageColor::from_raw(0));
    // below the high limit, but memory makers only need the low one
    assert!(!g.ensure_available_or_wait(WaitKind::MemoryMaker, deadline(1)));
}

#[test]
fn waiter_is_woken_by_released_pages() {
    let db = database(16);
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let mut g = db.lock();
            let waited = g.ensure_available_or_wait(WaitKind::Ordinary, deadline(5_000));
            (waited, g.available())
        });

        thread::sleep(Duration::from_millis(50));
        for i in 0..8 {
            db.add_free_range(i..i + 1);
        }

        let (waited, available) = waiter.join().unwrap();
        assert!(waited);
        assert!(available >= 8);
    });
    assert!(db.collaborators().discarded.lock().unwrap().is_empty());
}

#[test]
fn memory_makers_only_wait_for_the_low_limit() {
    let db = database(16);
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let mut g = db.lock();
            let waited = g.ensure_available_or_wait(WaitKind::MemoryMaker, deadline(5_000));
            (waited, g.available())
        });

        thread::sleep(Duration::from_millis(50));
        db.add_free_range(0..2);

        let (waited, available) = waiter.join().unwrap();
        assert!(waited);
        assert_eq!(available, 2);
    });
}

#[test]
fn starvation_discards_the_modified_pages_of_a_file() {
    let db = database_with(small_config().with_wait_limits(1, 2), 8);
    make_transition(&db, frame(0), mapped(1, 0), true);
    make_transition(&db, frame(1), mapped(2, 0), true);
    make_transition(&db, frame(2), mapped(1, 1), true);
    make_transition(&db, frame(3), paging(0), true);

    let mut g = db.lock();
    assert!(g.ensure_available_or_wait(WaitKind::Ordinary, deadline(20)));
    let stats = g.stats();
    assert_eq!(stats.available, 2);
    assert_eq!(stats.standby[StandbyPriority::new(5).unwrap().as_usize()], 2);
    assert_eq!(stats.modified, 2);
    assert_eq!(stats.pages_for_paging_file, 1);
    assert!(!g.frame_info(frame(0)).flags.modified());
    assert_eq!(
        g.frame_info(frame(1)).membership,
        kernel_pfn::ListMembership::Listed(Tier::Modified)
    );
    g.verify().unwrap();
    drop(g);

    assert_eq!(
        *db.collaborators().discarded.lock().unwrap(),
        [(FileId(1), 2)]
    );
}

#[test]
fn most_modified_file_is_chosen_when_configured() {
    let config = small_config()
        .with_wait_limits(1, 2)
        .with_victim_selection(VictimSelection::MostModifiedPages);
    let db = database_with(config, 8);
    make_transition(&db, frame(0), mapped(2, 0), true);
    make_transition(&db, frame(1), mapped(1, 0), true);
    make_transition(&db, frame(2), mapped(1, 1), true);

    assert!(db.lock().ensure_available_or_wait(WaitKind::Ordinary, deadline(20)));
    assert_eq!(
        *db.collaborators().discarded.lock().unwrap(),
        [(FileId(1), 2)]
    );
}

#[test]
fn next_file_is_discarded_only_after_reporting() {
    let db = database_with(small_config().with_wait_limits(1, 4), 8);
    make_transition(&db, frame(0), mapped(1, 0), true);
    make_transition(&db, frame(1), mapped(1, 1), true);
    make_transition(&db, frame(2), mapped(2, 0), true);
    make_transition(&db, frame(3), mapped(2, 1), true);

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            db.lock()
                .ensure_available_or_wait(WaitKind::Ordinary, deadline(10))
        });

        while db.collaborators().discarded.lock().unwrap().is_empty() {
            thread::yield_now();
        }
        // give the waiter a few more timeouts; nothing else may happen
        thread::sleep(Duration::from_millis(50));
        assert_eq!(db.collaborators().discarded.lock().unwrap().len(), 1);
        db.lock().last_chance_reported();

        assert!(waiter.join().unwrap());
    });

    assert_eq!(
        *db.collaborators().discarded.lock().unwrap(),
        [(FileId(1), 2), (FileId(2), 2)]
    );
    assert_eq!(db.stats().available, 4);
}

#[test]
#[should_panic(expected = "NO_PAGES_AVAILABLE")]
fn starving_without_anything_to_discard_is_fatal() {
    let db = database(8);
    db.lock()
        .ensure_available_or_wait(WaitKind::Ordinary, deadline(10));
}

#[test]
#[should_panic(expected = "DIRTY_MAPPED_PAGES_CONGESTION")]
fn image_pages_are_never_discarded() {
    let db = database(8);
    for i in 0..4 {
        make_transition(&db, frame(i), image(3, u64::from(i)), true);
    }
    db.lock()
        .ensure_available_or_wait(WaitKind::Ordinary, deadline(10));
}

#[test]
#[should_panic(expected = "DIRTY_NOWRITE_PAGES_CONGESTION")]
fn unwritable_pages_clog_memory() {
    let db = database(8);
    make_transition(&db, frame(0), paging(0), true);
    {
        let mut g = db.lock();
        g.unlink_middle(frame(0));
        g.insert_tail(Tier::ModifiedNoWrite, frame(0));
    }
    db.lock()
        .ensure_available_or_wait(WaitKind::Ordinary, deadline(10));
}

#[test]
#[should_panic(expected = "DISORDERLY_SHUTDOWN")]
fn starving_during_shutdown() {
    let db = database(8);
    db.begin_shutdown();
    db.lock()
        .ensure_available_or_wait(WaitKind::Ordinary, deadline(10));
}

#[test]
fn marching_on_keeps_waiting() {
    let db = database_with(small_config().with_march_on(true), 16);
    thread::scope(|s| {
        let waiter = s.spawn(|| {
            db.lock()
                .ensure_available_or_wait(WaitKind::Ordinary, deadline(5))
        });
        thread::sleep(Duration::from_millis(50));
        db.add_free_range(0..8);
        assert!(waiter.join().unwrap());
    });
}
