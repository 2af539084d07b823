// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The controller thread and dispatcher: the long-lived task
//! that snapshots tunables, runs one round of the selected traversal
//! strategy against the worker pool, and reports statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::control::{ControlSurface, Priority, RunState, Strategy, Tunables};
use crate::device::BlockDevice;
use crate::scsi::{build_cdb, classify, MAX_TRANSFER_LEN};
use crate::strategy::{self, Continue};
use crate::worker::{spawn_worker, RoundShared, VerifyRequest, WorkerHandle};

/// Owns the control surface and the long-lived controller thread for one
/// device. Dropping it stops the controller and joins its thread.
pub struct ScrubberInstance {
    pub control: Arc<ControlSurface>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ScrubberInstance {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let control = Arc::new(ControlSurface::new(device.capacity_sectors()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_control = Arc::clone(&control);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("scrub-controller".into())
            .spawn(move || controller_loop(thread_control, device, thread_stop))
            .expect("failed to spawn scrubber controller thread");

        Self {
            control,
            stop,
            thread: Some(thread),
        }
    }

    /// Stops the controller after its current round (if any) drains, and
    /// joins its thread.
    pub fn shutdown(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.control.wake_waiters();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for ScrubberInstance {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn controller_loop(control: Arc<ControlSurface>, device: Arc<dyn BlockDevice>, stop: Arc<AtomicBool>) {
    loop {
        let snapshot = match control.wait_until_on_or_stopped(&stop) {
            Some(t) => t,
            None => return,
        };
        if stop.load(Ordering::Acquire) {
            return;
        }
        run_round(snapshot, &control, &device);
    }
}

/// Runs one round to completion: snapshot already taken, applies the
/// doubling convention, spawns workers, runs the strategy via the
/// dispatcher, tears down, and writes back statistics.
fn run_round(mut snapshot: Tunables, control: &Arc<ControlSurface>, device: &Arc<dyn BlockDevice>) {
    control.reset_round_counters();

    let capacity = control.capacity_sectors();

    // Doubling convention: segsize/regsize are doubled on round entry,
    // preserved deliberately for behavioral parity with existing deployments.
    snapshot.segsize = snapshot.segsize.saturating_mul(2);
    snapshot.regsize = snapshot.regsize.saturating_mul(2);

    let effective_end = if snapshot.scount == 0 || snapshot.spoint.saturating_add(snapshot.scount) > capacity
    {
        capacity
    } else {
        snapshot.spoint + snapshot.scount
    };

    let shared = Arc::new(RoundShared::new());
    let workers: Vec<WorkerHandle> = (0..snapshot.threads.max(1))
        .map(|id| {
            spawn_worker(
                id as usize,
                Arc::clone(device),
                Arc::clone(control),
                Arc::clone(&shared),
                snapshot.vrprotect,
                snapshot.dpo,
                snapshot.timed,
                snapshot.strategy,
                snapshot.priority,
            )
        })
        .collect();

    if snapshot.priority == Priority::IdleCheck {
        sys::set_idle_priority_for_current_process();
    }

    warmup(&**device, &snapshot);

    let start = snapshot.timed.then(Instant::now);

    let mut emitted: u64 = 0;
    let run_result = strategy::run(
        snapshot.strategy,
        snapshot.spoint,
        effective_end,
        snapshot.segsize,
        snapshot.regsize,
        capacity,
        |lba, count| dispatch(control, &shared, &workers, &mut emitted, snapshot, lba, count),
    );
    if run_result.is_err() {
        log::warn!(
            "fixed strategy requires a device of at least 40,000,001 sectors; round skipped"
        );
    }

    for w in workers {
        w.stop_and_join();
    }

    let ttime_ms = start.map(|s| s.elapsed().as_millis() as u64).unwrap_or(0);
    let reqcount = control.snapshot().reqcount;
    let resptime_us = if reqcount > 0 {
        shared.resp_total_us() / reqcount
    } else {
        0
    };
    let read_errs = shared.read_errs();
    control.update_round_stats(ttime_ms, resptime_us, reqcount, read_errs);
    log::info!("scrub round complete: reqcount={reqcount} read_errs={read_errs} ttime_ms={ttime_ms}");
}

/// One dispatch per emitted segment: waits for an idle worker,
/// applies the pacing delay, hands the request to the first idle slot
/// found scanning from index 0, and decides whether the strategy should
/// keep going.
fn dispatch(
    control: &ControlSurface,
    shared: &RoundShared,
    workers: &[WorkerHandle],
    emitted: &mut u64,
    snapshot: Tunables,
    lba: u64,
    count: u32,
) -> Continue {
    shared.wait_and_claim();

    if snapshot.delayms > 0 {
        std::thread::sleep(Duration::from_millis(snapshot.delayms));
    }

    let idx = workers
        .iter()
        .position(|w| w.is_idle())
        .expect("wait_and_claim guarantees an idle worker exists");
    workers[idx].dispatch(VerifyRequest { lba, count });

    *emitted += 1;

    if control.current_state() == RunState::Abort {
        return Continue::Stop;
    }
    if snapshot.reqbound > 0 && *emitted > snapshot.reqbound {
        return Continue::Stop;
    }
    if snapshot.strategy == Strategy::Fixed && shared.fixed_invalid_op.load(Ordering::Acquire) {
        return Continue::Stop;
    }
    Continue::Yes
}

/// Issues a single, best-effort VERIFY at `spoint + segsize` before the
/// round starts. Failures are logged, never fatal.
fn warmup(device: &dyn BlockDevice, snapshot: &Tunables) {
    let lba = snapshot.spoint.saturating_add(snapshot.segsize);
    let count = snapshot.segsize.min(MAX_TRANSFER_LEN as u64) as u16;
    let cdb = build_cdb(lba as u32, count, snapshot.vrprotect, snapshot.dpo, false);
    match device.scsi_pt(&cdb, Duration::from_secs(60)) {
        Ok(pt) => {
            let outcome = classify(&pt);
            if outcome.is_error() {
                log::warn!("warm-up VERIFY at lba {lba} reported {outcome:?}");
            }
        }
        Err(e) => log::warn!("warm-up VERIFY at lba {lba} failed to submit: {e}"),
    }
}

#[cfg(target_os = "linux")]
pub(crate) mod sys {
    /// Sets the calling thread's I/O priority class to "idle" via the raw
    /// `ioprio_set` syscall, which glibc does not wrap.
    pub fn set_idle_priority_for_current_process() {
        const IOPRIO_WHO_PROCESS: libc::c_int = 1;
        const IOPRIO_CLASS_IDLE: libc::c_int = 3;
        const IOPRIO_CLASS_SHIFT: libc::c_int = 13;
        let ioprio = IOPRIO_CLASS_IDLE << IOPRIO_CLASS_SHIFT;

        #[cfg(target_arch = "x86_64")]
        const SYS_IOPRIO_SET: libc::c_long = 251;
        #[cfg(target_arch = "aarch64")]
        const SYS_IOPRIO_SET: libc::c_long = 30;

        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        unsafe {
            let ret = libc::syscall(SYS_IOPRIO_SET, IOPRIO_WHO_PROCESS, 0, ioprio);
            if ret != 0 {
                log::warn!(
                    "ioprio_set(IDLE) failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        log::warn!("ioprio_set(IDLE) unsupported on this architecture");
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) mod sys {
    pub fn set_idle_priority_for_current_process() {
        log::warn!("idle-check priority is only implemented on Linux");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fakedevice::FakeBlockDevice;

    #[test]
    fn round_covers_configured_range_exactly() {
        let fake = Arc::new(FakeBlockDevice::new(10_000));
        let device: Arc<dyn BlockDevice> = fake.clone();
        let instance = ScrubberInstance::new(device);
        instance.control.store("segsize", "50").unwrap();
        instance.control.store("threads", "3").unwrap();
        instance.control.store("state", "on").unwrap();

        // Give the controller a moment to run the (fast, in-memory) round.
        std::thread::sleep(Duration::from_millis(200));

        let calls = fake.calls.lock().unwrap();
        assert!(!calls.is_empty());
        drop(calls);

        instance.shutdown();
    }
}
