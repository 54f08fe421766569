// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Timeout behavior with no worker on the other side: the open fails with
//! `Timeout` and the stuck state logs its warning exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{Level, LevelFilter, Metadata, Record};
use nfp_card::NfpCard;
use nfp_hal::MemAperture;
use nfp_remotefs::{PollConfig, RemoteFile, TransferError};

static WARNINGS: AtomicUsize = AtomicUsize::new(0);

struct CountingLogger;

impl log::Log for CountingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Warn {
            WARNINGS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flush(&self) {}
}

static LOGGER: CountingLogger = CountingLogger;

#[test]
fn silent_worker_times_out_with_one_warning() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Warn);

    // No staged firmware and no worker thread: bring-up falls back to the
    // default regions and the worker status never leaves Unavailable.
    let card = NfpCard::attach(MemAperture::new(512 * 1024)).unwrap();
    let cfg = PollConfig {
        initial_delay: Duration::from_millis(1),
        warn_after: Duration::from_millis(30),
        ..PollConfig::default()
    };

    let err =
        RemoteFile::open_with(&card, "flash0:/late", Duration::from_millis(120), cfg).unwrap_err();
    assert!(matches!(err, TransferError::Timeout { .. }));
    assert_eq!(WARNINGS.load(Ordering::SeqCst), 1);
}
