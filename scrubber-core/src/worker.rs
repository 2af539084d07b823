// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The worker pool: each worker owns one request slot, rendezvous
//! with the dispatcher on a zero-capacity channel, and executes a VERIFY
//! split at the protocol's 65535-sector ceiling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::control::{ControlSurface, Priority, Strategy};
use crate::device::BlockDevice;
use crate::scsi::{build_cdb, classify, VerifyOutcome, MAX_TRANSFER_LEN};

/// One round's worth of request handed from the dispatcher to a worker.
/// `lba + count` never exceeds the round's effective end.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest {
    pub lba: u64,
    pub count: u32,
}

enum WorkerMsg {
    Verify(VerifyRequest),
    Stop,
}

/// Coordination block shared by the controller and all workers for the
/// duration of one round. Destroyed at round end.
pub struct RoundShared {
    available: Mutex<u32>,
    available_changed: std::sync::Condvar,
    read_errs: Mutex<u64>,
    resp_total_us: Mutex<u64>,
    /// Set by a worker that observes `VerifyOutcome::InvalidOp` while
    /// running the `Fixed` strategy.
    pub fixed_invalid_op: AtomicBool,
}

impl RoundShared {
    pub fn new() -> Self {
        Self {
            available: Mutex::new(0),
            available_changed: std::sync::Condvar::new(),
            read_errs: Mutex::new(0),
            resp_total_us: Mutex::new(0),
            fixed_invalid_op: AtomicBool::new(false),
        }
    }

    fn mark_idle(&self) {
        let mut a = self.available.lock().unwrap();
        *a += 1;
        self.available_changed.notify_one();
    }

    /// Blocks until at least one worker is idle, then claims it.
    pub fn wait_and_claim(&self) {
        let mut a = self.available.lock().unwrap();
        while *a == 0 {
            a = self.available_changed.wait(a).unwrap();
        }
        *a -= 1;
    }

    pub fn read_errs(&self) -> u64 {
        *self.read_errs.lock().unwrap()
    }

    pub fn resp_total_us(&self) -> u64 {
        *self.resp_total_us.lock().unwrap()
    }
}

/// A spawned worker thread plus the channel used to hand it requests and,
/// eventually, tell it to stop.
pub struct WorkerHandle {
    tx: SyncSender<WorkerMsg>,
    busy: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    /// Hands a request to this worker. The dispatcher must have already
    /// observed it idle via [`RoundShared::wait_and_claim`] and set its
    /// slot busy.
    pub fn dispatch(&self, req: VerifyRequest) {
        self.busy.store(true, Ordering::Release);
        // A zero-capacity channel: this send blocks until the worker's
        // recv() observes it, giving a true rendezvous hand-off.
        let _ = self.tx.send(WorkerMsg::Verify(req));
    }

    pub fn stop_and_join(mut self) {
        let _ = self.tx.send(WorkerMsg::Stop);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Spawns one worker thread. `id` is used only for thread naming/logging.
pub fn spawn_worker(
    id: usize,
    device: Arc<dyn BlockDevice>,
    control: Arc<ControlSurface>,
    shared: Arc<RoundShared>,
    vrprotect: u8,
    dpo: bool,
    timed: bool,
    strategy: Strategy,
    priority: Priority,
) -> WorkerHandle {
    let (tx, rx): (SyncSender<WorkerMsg>, Receiver<WorkerMsg>) = sync_channel(0);
    let busy = Arc::new(AtomicBool::new(false));
    let busy_for_thread = Arc::clone(&busy);

    let join = std::thread::Builder::new()
        .name(format!("scrub-worker-{id}"))
        .spawn(move || {
            if priority == Priority::IdleCheck {
                crate::controller::sys::set_idle_priority_for_current_process();
            }
            shared.mark_idle();
            for msg in rx.iter() {
                match msg {
                    WorkerMsg::Stop => break,
                    WorkerMsg::Verify(req) => {
                        run_request(
                            &*device, &control, &shared, req, vrprotect, dpo, timed, strategy,
                        );
                        busy_for_thread.store(false, Ordering::Release);
                        shared.mark_idle();
                    }
                }
            }
        })
        .expect("failed to spawn scrubber worker thread");

    WorkerHandle {
        tx,
        busy,
        join: Some(join),
    }
}

/// Executes one dispatcher request, splitting it at the 65535-sector SCSI
/// protocol ceiling. Each sub-request mutates a cursor local to this call,
/// never a value shared across workers.
fn run_request(
    device: &dyn BlockDevice,
    control: &ControlSurface,
    shared: &RoundShared,
    req: VerifyRequest,
    vrprotect: u8,
    dpo: bool,
    timed: bool,
    strategy: Strategy,
) {
    let mut pos = req.lba;
    let mut remaining = req.count;
    while remaining > 0 {
        let num = remaining.min(MAX_TRANSFER_LEN);
        let cdb = build_cdb(pos as u32, num as u16, vrprotect, dpo, false);

        let t0 = timed.then(Instant::now);
        let outcome = match device.scsi_pt(&cdb, Duration::from_secs(60)) {
            Ok(pt) => classify(&pt),
            Err(e) => {
                log::error!("scsi_pt failed at lba {pos}: {e}");
                VerifyOutcome::Other
            }
        };
        if let Some(t0) = t0 {
            let dt_us = t0.elapsed().as_micros() as u64;
            *shared.resp_total_us.lock().unwrap() += dt_us;
        }

        if outcome.is_error() {
            *shared.read_errs.lock().unwrap() += 1;
            match outcome {
                VerifyOutcome::MediumHardWithInfo { lba } => {
                    log::error!("medium/hardware error at lba {lba} (request lba {pos})")
                }
                other => log::error!("VERIFY failed at lba {pos}: {other:?}"),
            }
        }
        if strategy == Strategy::Fixed && outcome.aborts_fixed_round() {
            shared.fixed_invalid_op.store(true, Ordering::Release);
        }

        control.increment_reqcount();
        remaining -= num;
        pos += num as u64;
    }
}
