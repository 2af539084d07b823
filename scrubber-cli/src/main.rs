// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Thin command-line front end over `scrubber-core`: populates the
//! control surface from a config file and/or flags, starts one scrub
//! round, and reports statistics on completion or interruption.

mod cmdline;
mod config;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cmdline::Args;
use scrubber_core::device::SgIoDevice;
use scrubber_core::{BlockDevice, ControlSurface, ScrubberInstance};

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    let device = SgIoDevice::open(&args.device)
        .with_context(|| format!("opening {}", args.device))?;
    let device: Arc<dyn BlockDevice> = Arc::new(device);

    let instance = ScrubberInstance::new(device);
    configure(&instance.control, &args)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let control = Arc::clone(&instance.control);
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            log::info!("interrupted, aborting scrub");
            interrupted.store(true, Ordering::Release);
            let _ = control.store("state", "abort");
        })
        .context("installing SIGINT handler")?;
    }

    instance.control.store("state", "on").unwrap();
    log::info!("scrub started on {}", args.device);

    wait_for_round_to_settle(&instance.control, &interrupted);

    // Stop the controller from picking the tunable back up into a second
    // round; it only observes this after the round it's currently running
    // (if any) drains.
    let _ = instance.control.store("state", "off");
    std::thread::sleep(Duration::from_millis(200));

    report(&instance.control);
    instance.shutdown();
    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn configure(control: &ControlSurface, args: &Args) -> Result<()> {
    if let Some(path) = &args.config {
        config::load(path)?.apply(control)?;
    }

    control.store("spoint", &args.lba.to_string())?;
    control.store("scount", &args.count.to_string())?;
    if let Some(segment) = args.segment {
        control.store("segsize", &segment.to_string())?;
    }
    if let Some(region) = args.region {
        control.store("regsize", &region.to_string())?;
    }
    control.store("strategy", &args.technique)?;
    control.store("vrprotect", &args.vrprotect.to_string())?;
    control.store("dpo", if args.dpo { "on" } else { "off" })?;
    control.store("threads", &args.threads.to_string())?;
    control.store("priority", &args.priority)?;
    control.store("delayms", &args.delay_ms.to_string())?;
    control.store("verbose", &args.verbose.min(3).to_string())?;
    control.store("reqbound", &args.req_bound.to_string())?;
    control.store("timed", if args.timed { "on" } else { "off" })?;
    Ok(())
}

/// Polls `reqcount` until it stops changing across consecutive samples,
/// treating that as "the round has drained". This CLI is a thin,
/// out-of-core front end; the engine itself has no explicit
/// end-of-round notification, only the `reqcount` statistic it already
/// exposes.
fn wait_for_round_to_settle(control: &ControlSurface, interrupted: &AtomicBool) {
    let last = AtomicU64::new(u64::MAX);
    let mut stable_polls = 0;
    loop {
        if interrupted.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(Duration::from_millis(300));
        let current = control.snapshot().reqcount;
        if current == last.load(Ordering::Acquire) && current > 0 {
            stable_polls += 1;
            if stable_polls >= 2 {
                return;
            }
        } else {
            stable_polls = 0;
        }
        last.store(current, Ordering::Release);
    }
}

fn report(control: &ControlSurface) {
    let t = control.snapshot();
    println!("requests issued : {}", t.reqcount);
    println!("read errors     : {}", t.read_errs);
    if t.timed {
        println!("round time (ms) : {}", t.ttime_ms);
        println!("avg response (us): {}", t.resptime_us);
    }
}
