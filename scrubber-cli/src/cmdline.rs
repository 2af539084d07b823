// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Flag definitions for the thin CLI front end.

use argh::FromArgs;

#[derive(FromArgs)]
/// scrub a block device by issuing SCSI VERIFY(10) across its sector range
pub struct Args {
    /// path to the device node to scrub
    #[argh(positional)]
    pub device: String,

    /// optional TOML config file applied before CLI flags
    #[argh(option)]
    pub config: Option<String>,

    /// starting LBA
    #[argh(option, default = "0")]
    pub lba: u64,

    /// number of sectors to scrub (0 = to end of device)
    #[argh(option, default = "0")]
    pub count: u64,

    /// segment size, in the control surface's native units
    #[argh(option)]
    pub segment: Option<u64>,

    /// region size, used by the staggered strategy
    #[argh(option)]
    pub region: Option<u64>,

    /// traversal strategy: seql, stag, or fixed
    #[argh(option, default = "String::from(\"seql\")")]
    pub technique: String,

    /// VERIFY protection field, 0..7
    #[argh(option, default = "0")]
    pub vrprotect: u8,

    /// set the VERIFY "disable page out" cache hint
    #[argh(switch)]
    pub dpo: bool,

    /// number of worker threads
    #[argh(option, default = "4")]
    pub threads: u32,

    /// io scheduling priority: realtime or idlechk
    #[argh(option, default = "String::from(\"realtime\")")]
    pub priority: String,

    /// artificial pacing delay between dispatches, in milliseconds
    #[argh(option, default = "0")]
    pub delay_ms: u64,

    /// verbosity, 0..3
    #[argh(option, default = "0")]
    pub verbose: u8,

    /// maximum VERIFY requests per round (0 = unbounded)
    #[argh(option, default = "0")]
    pub req_bound: u64,

    /// collect round timing statistics
    #[argh(switch)]
    pub timed: bool,
}
