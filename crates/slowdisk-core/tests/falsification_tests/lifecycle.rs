//! Falsification Tests: Category B - Load, Unload and Reload (F007-F012)

use std::sync::Arc;
use std::sync::atomic::Ordering;

use slowdisk_core::{
    DelayConfig, DelayRange, LifecycleState, OsEntropy, SlowdiskError, read_hook, write_hook,
};
use slowdisk_table::{FixedLocator, Locator, handler_addr};

use super::{
    CountingLocator, RecordingEntropy, SERIAL, anchorless_table, call_write, controller,
    close_pipe, page_table, pipe, scan, snapshot,
};

/// F007: Defaults give [500, 1000] and each write draws one delay in range
#[test]
fn f007_defaults_scenario() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let entropy = Arc::new(RecordingEntropy::default());
    let mut controller = controller(scan(&page), DelayConfig::default(), entropy.clone());

    let report = controller.load().unwrap();
    assert_eq!(report.range, DelayRange::new(500, 1000).unwrap());
    assert_eq!(report.table, page.table().addr());

    let fds = pipe();
    for _ in 0..5 {
        assert_eq!(call_write(&page, fds.1, b"slow"), 4);
    }
    close_pipe(fds);

    let drawn = entropy.drawn();
    assert_eq!(drawn.len(), 5);
    for raw in drawn {
        let iterations = report.range.sample(raw);
        assert!((500..=1000).contains(&iterations));
    }

    controller.unload();
}

/// F008: An anchor mismatch over the whole scan rejects the load and mutates nothing
#[test]
fn f008_table_not_found_mutates_nothing() {
    let _serial = SERIAL.lock();
    let page = anchorless_table();
    let before = snapshot(&page);

    assert!(scan(&page).locate().is_none());
    let mut controller = controller(scan(&page), DelayConfig::default(), Arc::new(OsEntropy));

    let err = controller.load().unwrap_err();
    assert!(matches!(err, SlowdiskError::TableNotFound));
    assert_eq!(err.status_code(), -1);
    assert_eq!(controller.state(), LifecycleState::Failed);
    assert_eq!(snapshot(&page), before);
}

/// F009: Restore after install puts back the exact originals
#[test]
fn f009_restore_is_exact() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let before = snapshot(&page);
    let mut controller = controller(scan(&page), DelayConfig::default(), Arc::new(OsEntropy));

    controller.load().unwrap();
    assert_eq!(page.slot(0), Some(handler_addr(read_hook)));
    assert_eq!(page.slot(1), Some(handler_addr(write_hook)));

    let outcome = controller.unload().unwrap();
    assert!(outcome.is_clean());
    assert_eq!(snapshot(&page), before);
}

/// F010: A second restore is a no-op
#[test]
fn f010_second_restore_is_noop() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let before = snapshot(&page);
    let mut controller = controller(scan(&page), DelayConfig::default(), Arc::new(OsEntropy));

    controller.load().unwrap();
    controller.unload().unwrap();
    assert!(controller.unload().is_none());
    assert!(controller.unload().is_none());
    assert_eq!(snapshot(&page), before);
    assert_eq!(controller.state(), LifecycleState::Restored);
}

/// F011: Reload re-locates the table and behaves like the first cycle
#[test]
fn f011_reload_cycle() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let before = snapshot(&page);
    let (locator, calls) = CountingLocator::new(scan(&page));
    let mut controller = controller(locator, DelayConfig::new(1, 2), Arc::new(OsEntropy));

    let first = controller.load().unwrap();
    let patched = snapshot(&page);
    controller.unload().unwrap();
    assert_eq!(snapshot(&page), before);

    let second = controller.load().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(first, second);
    assert_eq!(snapshot(&page), patched);

    controller.unload().unwrap();
    assert_eq!(snapshot(&page), before);
}

/// F012: A failed load is terminal for its controller, but leaves the host usable
#[test]
fn f012_failed_load_is_terminal() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let mut failed = controller(FixedLocator::missing(), DelayConfig::default(), Arc::new(OsEntropy));
    assert!(failed.load().is_err());
    assert!(matches!(
        failed.load(),
        Err(SlowdiskError::InvalidState { .. })
    ));
    assert!(failed.unload().is_none());

    let mut fresh = controller(scan(&page), DelayConfig::default(), Arc::new(OsEntropy));
    fresh.load().unwrap();
    fresh.unload().unwrap();
}
