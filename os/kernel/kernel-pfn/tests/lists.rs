mod common;

use common::*;
use kernel_pfn::{
    BackingDescriptor, ConfigError, FrameIndex, ListId, ListMembership, PageColor,
    PageFrameDatabase, ShortFlags, StandbyPriority, Tier,
};

#[test]
fn basic_free_cycle_by_color() {
    let db = colored_database(&[3; 10]);
    db.add_free_range(0..10);
    let color = PageColor::from_raw(3);

    let mut g = db.lock();
    assert_eq!(g.total(Tier::Free), 10);

    let taken = g.remove_any_page(color);
    assert_eq!(g.total(Tier::Free), 9);
    assert_eq!(g.frame_info(taken).membership, ListMembership::NotListed);

    g.insert_tail(Tier::Free, taken);
    assert_eq!(g.total(Tier::Free), 10);
    assert_eq!(g.color_total(Tier::Free, color), 10);

    let again = g.remove_by_color(Tier::Free, color).unwrap();
    assert_eq!(g.frame_info(again).color, color);

    // the reinserted page is last in line
    let mut rest = vec![again];
    while let Some(f) = g.remove_by_color(Tier::Free, color) {
        rest.push(f);
    }
    assert_eq!(rest.last(), Some(&taken));
    assert_eq!(rest.len(), 10);
    g.verify().unwrap();
}

#[test]
fn random_operations_keep_lists_consistent() {
    let db = database(64);
    let mut rng = Lcg::new(7);
    let mut owned: Vec<FrameIndex> = db.frames().collect();

    for step in 0..2_000 {
        let mut g = db.lock();
        match rng.next(6) {
            0 | 1 if !owned.is_empty() => {
                let f = owned.swap_remove(rng.index(owned.len()));
                let tier = if rng.next(2) == 0 { Tier::Free } else { Tier::Zeroed };
                g.insert_tail(tier, f);
            }
            2 if !owned.is_empty() => {
                let f = owned.swap_remove(rng.index(owned.len()));
                let backing = if rng.next(2) == 0 {
                    mapped(1, step)
                } else {
                    paging(step)
                };
                let dirty = rng.next(2) == 0;
                g.initialize_frame(f, backing, None, dirty);
                g.decrement_share_count(f);
            }
            3 if g.available() != 0 => {
                let color = PageColor::from_raw(rng.color(4));
                owned.push(g.remove_any_page(color));
            }
            4 if g.total(Tier::Modified) != 0 => {
                // the writer takes the page, writes it and releases it clean
                let f = g.remove_head(Tier::Modified);
                g.database()
                    .update_flags(f, |flags| flags.with_modified(false));
                g.insert_tail(Tier::Standby(StandbyPriority::LOWEST), f);
            }
            5 if g.available() != 0 => {
                let color = PageColor::from_raw(rng.color(4));
                owned.push(g.remove_zero_page(color));
            }
            _ => {}
        }
        if let Err(e) = g.verify() {
            panic!("step {step}: {e}");
        }
    }

    let stats = db.stats();
    let listed = stats.zeroed + stats.free + stats.standby_total() + stats.modified;
    assert_eq!(listed + owned.len() as u64, 64);
}

#[test]
fn insert_and_unlink_round_trip() {
    let db = database(8);
    let f = frame(2);
    {
        let mut g = db.lock();
        g.initialize_frame(f, mapped(1, 0), None, false);
    }
    db.lock().decrement_share_count(f);
    let before = db.stats();

    let mut g = db.lock();
    g.unlink_middle(f);
    assert_eq!(g.frame_info(f).membership, ListMembership::NotListed);
    assert_eq!(g.available(), before.available - 1);

    g.insert_tail(Tier::Standby(StandbyPriority::new(5).unwrap()), f);
    drop(g);
    assert_eq!(db.stats(), before);
    db.lock().verify().unwrap();
}

#[test]
fn standby_front_insert_is_taken_first() {
    let db = database(8);
    let p = StandbyPriority::new(3).unwrap();
    for i in 0..3 {
        make_transition(&db, frame(i), mapped(1, u64::from(i)), false);
    }

    let mut g = db.lock();
    // move them to priority 3: 0 and 1 at the tail, 2 at the front
    for i in 0..3 {
        g.unlink_middle(frame(i));
    }
    g.insert_tail(Tier::Standby(p), frame(0));
    g.insert_tail(Tier::Standby(p), frame(1));
    g.insert_front(Tier::Standby(p), frame(2));

    assert_eq!(
        g.list_frames(ListId::Standby(p)),
        [frame(2), frame(0), frame(1)]
    );
    assert_eq!(g.remove_head(Tier::Standby(p)), frame(2));
    g.verify().unwrap();
}

#[test]
fn zeroed_head_insert_reverses_order() {
    let db = database(4);
    let mut g = db.lock();
    for i in 0..4 {
        g.insert_head(Tier::Zeroed, frame(i));
    }
    assert_eq!(
        g.list_frames(ListId::Zeroed),
        [frame(3), frame(2), frame(1), frame(0)]
    );
    g.verify().unwrap();
}

#[test]
fn modified_pages_split_by_destination() {
    let db = database(8);
    make_transition(&db, frame(0), mapped(1, 0), true);
    make_transition(&db, frame(1), paging(0), true);
    make_transition(&db, frame(2), mapped(1, 1), true);
    make_transition(&db, frame(3), BackingDescriptor::DemandZero, true);

    let stats = db.stats();
    assert_eq!(stats.modified, 4);
    assert_eq!(stats.pages_for_paging_file, 2);
    assert_eq!(stats.transition_shared, 2);
    assert_eq!(stats.transition_private, 2);
    assert_eq!(stats.available, 0);
    // armed once for the first file-backed page
    assert_eq!(db.collaborators().timer_arms(), 1);

    let mut g = db.lock();
    assert_eq!(g.list_frames(ListId::Modified), [frame(0), frame(2)]);

    // file-backed pages are written first
    assert_eq!(g.remove_head(Tier::Modified), frame(0));
    assert_eq!(g.remove_head(Tier::Modified), frame(2));
    let third = g.remove_head(Tier::Modified);
    assert!(third == frame(1) || third == frame(3));
    assert_eq!(g.stats().pages_for_paging_file, 1);

    g.unlink_middle(if third == frame(1) { frame(3) } else { frame(1) });
    assert_eq!(g.stats().pages_for_paging_file, 0);
    assert_eq!(g.total(Tier::Modified), 0);
    g.verify().unwrap();
}

#[test]
fn mapped_write_timer_rearms_after_expiry() {
    let db = database(8);
    make_transition(&db, frame(0), mapped(1, 0), true);
    make_transition(&db, frame(1), mapped(1, 1), true);
    assert_eq!(db.collaborators().timer_arms(), 1);

    {
        let mut g = db.lock();
        g.unlink_middle(frame(0));
        g.unlink_middle(frame(1));
        g.mapped_write_timer_expired();
        g.insert_tail(Tier::Modified, frame(0));
    }
    assert_eq!(db.collaborators().timer_arms(), 2);
}

#[test]
fn modified_writer_is_woken_when_memory_is_tight() {
    let config = small_config()
        .with_writer_limits(16, 32)
        .with_modified_limits(100, 2);
    let db = database_with(config, 8);
    make_transition(&db, frame(0), paging(0), true);
    assert_eq!(db.collaborators().writer_wakeups(), 0);
    make_transition(&db, frame(1), paging(1), true);
    assert_eq!(db.collaborators().writer_wakeups(), 1);
}

#[test]
fn modified_no_write_front_insert() {
    let db = database(4);
    make_transition(&db, frame(0), mapped(2, 0), true);
    make_transition(&db, frame(1), mapped(2, 1), true);
    let mut g = db.lock();
    g.unlink_middle(frame(0));
    g.unlink_middle(frame(1));
    g.insert_front(Tier::ModifiedNoWrite, frame(0));
    g.insert_front(Tier::ModifiedNoWrite, frame(1));
    assert_eq!(
        g.list_frames(ListId::ModifiedNoWrite),
        [frame(1), frame(0)]
    );
    assert_eq!(g.stats().transition_shared, 2);
    g.verify().unwrap();
}

#[test]
fn removal_requested_pages_go_to_bad() {
    let db = database(8);
    db.add_free_range(0..2);
    make_transition(&db, frame(4), mapped(1, 0), false);

    let mut g = db.lock();
    g.request_removal(frame(0));
    g.request_removal(frame(4));
    assert_eq!(g.list_frames(ListId::Bad), [frame(0), frame(4)]);
    assert_eq!(g.total(Tier::Free), 1);
    assert_eq!(g.available(), 1);
    g.verify().unwrap();
    drop(g);

    // the standby page's PTE got its original contents back
    assert_eq!(db.collaborators().restored_frames(), [frame(4)]);
    assert!(db.frame_info(frame(0)).flags.removal_requested());
}

#[test]
fn removal_request_on_owned_page_applies_on_release() {
    let db = database(4);
    let mut g = db.lock();
    g.request_removal(frame(1));
    assert_eq!(g.frame_info(frame(1)).membership, ListMembership::NotListed);
    g.insert_tail(Tier::Free, frame(1));
    assert_eq!(
        g.frame_info(frame(1)).membership,
        ListMembership::Listed(Tier::Bad)
    );
}

#[test]
fn rom_pages_live_on_the_rom_list() {
    let db = database(4);
    let mut g = db.lock();
    g.insert_tail(Tier::Rom, frame(0));
    assert!(g.frame_info(frame(0)).flags.rom());
    g.unlink_middle(frame(0));
    g.insert_tail(Tier::Rom, frame(0));
    assert_eq!(g.total(Tier::Rom), 1);
    g.verify().unwrap();
}

#[test]
#[should_panic(expected = "MEMORY_MANAGEMENT")]
fn rom_page_on_free_list_is_fatal() {
    let db = database(4);
    db.update_flags(frame(0), |f| f.with_rom(true));
    db.lock().insert_tail(Tier::Free, frame(0));
}

#[test]
#[should_panic(expected = "PFN_LIST_CORRUPT")]
fn double_insert_is_fatal() {
    let db = database(4);
    let mut g = db.lock();
    g.insert_tail(Tier::Free, frame(0));
    g.insert_tail(Tier::Zeroed, frame(0));
}

#[test]
#[should_panic(expected = "PFN_REFERENCE_COUNT")]
fn referenced_page_cannot_be_freed() {
    let db = database(4);
    let mut g = db.lock();
    g.initialize_frame(frame(0), paging(0), None, false);
    g.insert_tail(Tier::Free, frame(0));
}

#[test]
#[should_panic(expected = "MEMORY_MANAGEMENT")]
fn standby_page_without_backing_is_fatal() {
    let db = database(4);
    db.lock()
        .insert_tail(Tier::Standby(StandbyPriority::LOWEST), frame(0));
}

#[test]
#[should_panic(expected = "PFN_LIST_CORRUPT")]
fn removing_from_empty_list_is_fatal() {
    let db = database(4);
    db.lock().remove_head(Tier::Bad);
}

#[test]
#[should_panic(expected = "PFN_LIST_CORRUPT")]
fn unlink_middle_rejects_free_pages() {
    let db = database(4);
    let mut g = db.lock();
    g.insert_tail(Tier::Free, frame(0));
    g.unlink_middle(frame(0));
}

#[test]
fn free_insert_clears_transient_flags() {
    let db = database(4);
    db.update_flags(frame(0), |_| {
        ShortFlags::new()
            .with_modified(true)
            .with_read_in_progress(true)
            .with_must_be_cached(true)
    });
    let mut g = db.lock();
    g.insert_tail(Tier::Free, frame(0));
    let flags = g.frame_info(frame(0)).flags;
    assert!(!flags.modified());
    assert!(!flags.read_in_progress());
    assert!(flags.must_be_cached());
}

#[test]
fn oversized_color_space_is_rejected_at_construction() {
    let cfg = small_config().with_colors(1 << 31, 2);
    let err = PageFrameDatabase::new(cfg, 4, Recorder::default()).err();
    assert_eq!(
        err,
        Some(ConfigError::ColorSpace {
            secondary: 1 << 31,
            nodes: 2
        })
    );
}
