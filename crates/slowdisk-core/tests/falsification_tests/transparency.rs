//! Falsification Tests: Category C - Transparency (F013-F016)

use std::sync::Arc;

use slowdisk_core::{DelayConfig, OsEntropy};

use super::{SERIAL, call_read, call_write, close_pipe, controller, page_table, pipe, scan};

/// F013: Bytes written through the wrappers arrive unchanged
#[test]
fn f013_write_then_read_roundtrip_through_wrappers() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let mut controller = controller(scan(&page), DelayConfig::new(0, 50), Arc::new(OsEntropy));
    controller.load().unwrap();

    let fds = pipe();
    let message = b"the quick brown fox";
    assert_eq!(call_write(&page, fds.1, message), message.len() as libc::c_long);

    let mut buf = [0u8; 64];
    let n = call_read(&page, fds.0, &mut buf);
    assert_eq!(n, message.len() as libc::c_long);
    assert_eq!(&buf[..message.len()], message);
    close_pipe(fds);

    controller.unload();
}

/// F014: Return values match the originals for the same arguments
#[test]
fn f014_return_values_match_originals() {
    let _serial = SERIAL.lock();
    let page = page_table();

    let fds = pipe();
    let direct_write = call_write(&page, fds.1, b"abc");
    let mut buf = [0u8; 8];
    let direct_read = call_read(&page, fds.0, &mut buf);

    let mut controller = controller(scan(&page), DelayConfig::new(0, 50), Arc::new(OsEntropy));
    controller.load().unwrap();
    let wrapped_write = call_write(&page, fds.1, b"abc");
    let wrapped_read = call_read(&page, fds.0, &mut buf);
    controller.unload();
    close_pipe(fds);

    assert_eq!(direct_write, wrapped_write);
    assert_eq!(direct_read, wrapped_read);
}

/// F015: Errors from the originals pass through unchanged
#[test]
fn f015_errors_pass_through() {
    let _serial = SERIAL.lock();
    let page = page_table();

    let direct = call_write(&page, -1, b"x");
    let direct_errno = std::io::Error::last_os_error().raw_os_error();

    let mut controller = controller(scan(&page), DelayConfig::new(0, 50), Arc::new(OsEntropy));
    controller.load().unwrap();
    let wrapped = call_write(&page, -1, b"x");
    let wrapped_errno = std::io::Error::last_os_error().raw_os_error();
    controller.unload();

    assert_eq!(direct, -1);
    assert_eq!(wrapped, direct);
    assert_eq!(wrapped_errno, direct_errno);
    assert_eq!(wrapped_errno, Some(libc::EBADF));
}

/// F016: Concurrent callers all see original results while wrapped
#[test]
fn f016_concurrent_callers() {
    let _serial = SERIAL.lock();
    let page = page_table();
    let mut controller = controller(scan(&page), DelayConfig::new(100, 200), Arc::new(OsEntropy));
    controller.load().unwrap();

    let fds = pipe();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    assert_eq!(call_write(&page, fds.1, b"z"), 1);
                }
            });
        }
    });

    let mut buf = [0u8; 128];
    let mut total = 0;
    while total < 100 {
        let n = call_read(&page, fds.0, &mut buf);
        assert!(n > 0);
        total += n;
    }
    assert_eq!(total, 100);
    close_pipe(fds);

    controller.unload();
}
