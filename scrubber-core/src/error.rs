// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;

use remain::sorted;
use thiserror::Error;

/// Errors raised at the boundary of the scrubbing engine: device setup,
/// pass-through submission, and control-surface misuse. SCSI-level outcomes
/// of an individual VERIFY call are not errors; see [`crate::scsi::VerifyOutcome`].
#[sorted]
#[derive(Error, Debug)]
pub enum ScrubError {
    #[error("controller already running")]
    AlreadyRunning,
    #[error("failed to query device capacity: {0}")]
    Capacity(io::Error),
    #[error("failed to submit SG_IO request: {0}")]
    Ioctl(io::Error),
    #[error("unknown control-surface attribute: {0}")]
    NoSuchAttribute(String),
    #[error("failed to open device {path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("segsize and regsize must be nonzero")]
    ZeroSize,
}

pub type Result<T> = std::result::Result<T, ScrubError>;
