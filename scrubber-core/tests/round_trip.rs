// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Drives a full controller round against an in-memory device and checks
//! the statistics and error accounting it reports back through the
//! control surface.

use std::sync::Arc;
use std::time::Duration;

use scrubber_core::device::fakedevice::FakeBlockDevice;
use scrubber_core::scsi::PtResult;
use scrubber_core::{BlockDevice, RunState, ScrubberInstance};

fn wait_until_settled(control: &scrubber_core::ControlSurface) {
    let mut last = u64::MAX;
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(50));
        let current = control.snapshot().reqcount;
        if current == last && current > 0 {
            return;
        }
        last = current;
    }
}

#[test]
fn scrub_round_covers_device_and_counts_errors() {
    let fake = Arc::new(FakeBlockDevice::new(2_000));

    // segsize=100 is doubled to 200 by the round-entry doubling convention,
    // so the sequential strategy emits segments starting at every multiple
    // of 200 (0, 200, 400, ...). Key the canned failure at one of those
    // starting LBAs, since FakeBlockDevice looks responses up by the CDB's
    // own starting LBA, not by any sector within the segment.
    fake.fail_at(
        400,
        PtResult {
            scsi_status: scrubber_core::scsi::CHECK_CONDITION,
            sense: {
                let mut s = [0u8; 32];
                s[0] = 0x70;
                s[2] = 0x03;
                s
            },
            sense_len: 32,
            ..Default::default()
        },
    );

    let device: Arc<dyn BlockDevice> = fake.clone();
    let instance = ScrubberInstance::new(device);
    instance.control.store("spoint", "0").unwrap();
    instance.control.store("scount", "2000").unwrap();
    instance.control.store("segsize", "100").unwrap();
    instance.control.store("threads", "4").unwrap();
    instance.control.store("timed", "on").unwrap();
    instance.control.store("state", "on").unwrap();

    wait_until_settled(&instance.control);
    instance.control.store("state", "off").unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let snapshot = instance.control.snapshot();
    assert_eq!(snapshot.state, RunState::Off);
    assert!(snapshot.reqcount > 0);
    assert_eq!(snapshot.read_errs, 1);

    let calls = fake.calls.lock().unwrap();
    assert!(!calls.is_empty());
    assert!(calls.iter().any(|&(lba, _)| lba == 400));
    drop(calls);

    instance.shutdown();
}
