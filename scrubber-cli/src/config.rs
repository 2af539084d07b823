// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Optional TOML configuration file, applied to the control surface
//! before CLI flags, following a defaulted, `deny_unknown_fields`
//! `serde::Deserialize` struct.

use anyhow::Context;
use scrubber_core::ControlSurface;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub reqbound: Option<u64>,
    pub strategy: Option<String>,
    pub priority: Option<String>,
    pub segsize: Option<u64>,
    pub regsize: Option<u64>,
    pub threads: Option<u32>,
    pub dpo: Option<bool>,
    pub vrprotect: Option<u8>,
    pub verbose: Option<u8>,
    pub spoint: Option<u64>,
    pub scount: Option<u64>,
    pub timed: Option<bool>,
    pub delayms: Option<u64>,
}

pub fn load(path: &str) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {path}"))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {path}"))
}

impl FileConfig {
    /// Applies every present field to the control surface via `store`
    ///, so the same validation/clamping rules apply regardless of
    /// whether a value came from the file or a CLI flag.
    pub fn apply(&self, control: &ControlSurface) -> anyhow::Result<()> {
        macro_rules! apply_opt {
            ($field:ident, $attr:literal) => {
                if let Some(v) = &self.$field {
                    control
                        .store($attr, &v.to_string())
                        .with_context(|| format!("applying config field {}", $attr))?;
                }
            };
        }
        apply_opt!(reqbound, "reqbound");
        apply_opt!(strategy, "strategy");
        apply_opt!(priority, "priority");
        apply_opt!(segsize, "segsize");
        apply_opt!(regsize, "regsize");
        apply_opt!(threads, "threads");
        apply_opt!(vrprotect, "vrprotect");
        apply_opt!(verbose, "verbose");
        apply_opt!(spoint, "spoint");
        apply_opt!(scount, "scount");
        apply_opt!(delayms, "delayms");
        if let Some(v) = self.dpo {
            control.store("dpo", if v { "on" } else { "off" })?;
        }
        if let Some(v) = self.timed {
            control.store("timed", if v { "on" } else { "off" })?;
        }
        Ok(())
    }
}
