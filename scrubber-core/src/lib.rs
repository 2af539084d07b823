// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A multi-threaded disk-scrubbing engine: issues SCSI VERIFY(10) requests
//! across a block device's whole sector range to surface latent media and
//! hardware errors, without reading or writing payload data.

pub mod control;
pub mod controller;
pub mod device;
pub mod error;
pub mod scsi;
pub mod strategy;
pub mod worker;

pub use control::{ControlSurface, Priority, RunState, Strategy, Tunables};
pub use controller::ScrubberInstance;
pub use device::BlockDevice;
pub use error::{Result, ScrubError};
pub use scsi::VerifyOutcome;
