// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The tunable surface: a mutex-guarded set of attributes with
//! sysfs-style `show`/`store` semantics, plus the round statistics the
//! controller updates.

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, ScrubError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Seql,
    Stag,
    Fixed,
}

impl Strategy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "seql" => Some(Strategy::Seql),
            "stag" => Some(Strategy::Stag),
            "fixed" => Some(Strategy::Fixed),
            _ => None,
        }
    }

    fn show(self) -> &'static str {
        match self {
            Strategy::Seql => "seql",
            Strategy::Stag => "stag",
            Strategy::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Realtime,
    IdleCheck,
}

impl Priority {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "realtime" => Some(Priority::Realtime),
            "idlechk" => Some(Priority::IdleCheck),
            _ => None,
        }
    }

    fn show(self) -> &'static str {
        match self {
            Priority::Realtime => "realtime",
            Priority::IdleCheck => "idlechk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    On,
    Off,
    Abort,
}

impl RunState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "on" => Some(RunState::On),
            "off" => Some(RunState::Off),
            "abort" => Some(RunState::Abort),
            _ => None,
        }
    }

    fn show(self) -> &'static str {
        match self {
            RunState::On => "on",
            RunState::Off => "off",
            RunState::Abort => "abort",
        }
    }
}

/// All tunables of a [`crate::ScrubberInstance`], plus the statistics the
/// controller writes back after each round. `Copy` because the controller
/// takes a snapshot of it by value at the start of every round.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub reqbound: u64,
    pub strategy: Strategy,
    pub priority: Priority,
    pub segsize: u64,
    pub regsize: u64,
    pub state: RunState,
    pub threads: u32,
    pub dpo: bool,
    pub vrprotect: u8,
    pub verbose: u8,
    pub spoint: u64,
    pub scount: u64,
    pub timed: bool,
    pub ttime_ms: u64,
    pub resptime_us: u64,
    pub reqcount: u64,
    pub delayms: u64,
    /// VERIFY calls in the last completed round that reported a non-good
    /// outcome.
    pub read_errs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            reqbound: 0,
            strategy: Strategy::Seql,
            priority: Priority::Realtime,
            segsize: 256,
            regsize: 1024,
            state: RunState::Off,
            threads: 4,
            dpo: false,
            vrprotect: 0,
            verbose: 0,
            spoint: 0,
            scount: 0,
            timed: false,
            ttime_ms: 0,
            resptime_us: 0,
            reqcount: 0,
            delayms: 0,
            read_errs: 0,
        }
    }
}

/// The mutex-guarded control surface. `state_changed` is signaled whenever
/// a store to `state` transitions it to `On`, waking the controller from
/// its idle wait.
pub struct ControlSurface {
    pub(crate) tunables: Mutex<Tunables>,
    pub(crate) state_changed: Condvar,
    capacity_sectors: u64,
}

impl ControlSurface {
    pub fn new(capacity_sectors: u64) -> Self {
        Self {
            tunables: Mutex::new(Tunables::default()),
            state_changed: Condvar::new(),
            capacity_sectors,
        }
    }

    pub fn snapshot(&self) -> Tunables {
        *self.tunables.lock()
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// Renders a human-readable attribute value, using the
    /// `[selected] other1 other2` convention for enumerations.
    pub fn show(&self, attr: &str) -> Result<String> {
        let t = self.tunables.lock();
        Ok(match attr {
            "reqbound" => format!("{}\n", t.reqbound),
            "segsize" => format!("Segment size: {} KB\n", t.segsize),
            "regsize" => format!("Region size: {} KB\n", t.regsize),
            "spoint" => format!("{}\n", t.spoint),
            "scount" => format!("{}\n", t.scount),
            "strategy" => show_enum(t.strategy.show(), &["seql", "stag", "fixed"]),
            "priority" => show_enum(t.priority.show(), &["realtime", "idlechk"]),
            "state" => show_enum(t.state.show(), &["on", "off", "abort"]),
            "threads" => format!("{}\n", t.threads),
            "dpo" => show_enum(if t.dpo { "on" } else { "off" }, &["on", "off"]),
            "vrprotect" => format!("{}\n", t.vrprotect),
            "verbose" => format!("{}\n", t.verbose),
            "timed" => show_enum(if t.timed { "on" } else { "off" }, &["on", "off"]),
            "ttime_ms" => format!("{}\n", t.ttime_ms),
            "resptime_us" => format!("{}\n", t.resptime_us),
            "reqcount" => format!("{}\n", t.reqcount),
            "delayms" => format!("{}\n", t.delayms),
            other => return Err(ScrubError::NoSuchAttribute(other.to_string())),
        })
    }

    /// Applies a store to a named attribute, validating and clamping it.
    /// A malformed or out-of-range value is logged and the previous value
    /// is retained; the store is still reported as consumed (`Ok(())`),
    /// matching the original sysfs semantics where a bad write is logged,
    /// not surfaced as an I/O error to the caller. Only an unknown
    /// attribute name is a hard error.
    pub fn store(&self, attr: &str, value: &str) -> Result<()> {
        let value = value.trim_end_matches('\n');
        let mut t = self.tunables.lock();
        match attr {
            "reqbound" => set_or_warn(&mut t.reqbound, parse_u64(value), attr, value),
            "segsize" => set_or_warn(
                &mut t.segsize,
                clamp_nonzero_kb(value, self.capacity_sectors),
                attr,
                value,
            ),
            "regsize" => set_or_warn(
                &mut t.regsize,
                clamp_nonzero_kb(value, self.capacity_sectors),
                attr,
                value,
            ),
            "spoint" => {
                if let Some(v) = parse_u64(value) {
                    t.spoint = if v > self.capacity_sectors { 0 } else { v };
                } else {
                    warn_invalid(attr, value);
                }
            }
            "scount" => {
                if let Some(v) = parse_u64(value) {
                    t.scount = v.min(self.capacity_sectors);
                } else {
                    warn_invalid(attr, value);
                }
            }
            "strategy" => set_or_warn(&mut t.strategy, Strategy::parse(value), attr, value),
            "priority" => set_or_warn(&mut t.priority, Priority::parse(value), attr, value),
            "state" => {
                if let Some(new_state) = RunState::parse(value) {
                    t.state = new_state;
                    if new_state == RunState::On {
                        self.state_changed.notify_all();
                    }
                } else {
                    warn_invalid(attr, value);
                }
            }
            "threads" => match parse_u64(value) {
                Some(v) if v > 0 => t.threads = v as u32,
                _ => warn_invalid(attr, value),
            },
            "dpo" => set_or_warn(&mut t.dpo, parse_bool(value), attr, value),
            "vrprotect" => match parse_u64(value) {
                Some(v) if v <= 7 => t.vrprotect = v as u8,
                _ => warn_invalid(attr, value),
            },
            "verbose" => match parse_u64(value) {
                Some(v) if v <= 3 => t.verbose = v as u8,
                _ => warn_invalid(attr, value),
            },
            "timed" => set_or_warn(&mut t.timed, parse_bool(value), attr, value),
            "ttime_ms" => set_or_warn(&mut t.ttime_ms, parse_u64(value), attr, value),
            "reqcount" => set_or_warn(&mut t.reqcount, parse_u64(value), attr, value),
            "delayms" => set_or_warn(&mut t.delayms, parse_u64(value), attr, value),
            "resptime_us" => {
                log::warn!("store to read-only attribute resptime_us ignored");
            }
            other => return Err(ScrubError::NoSuchAttribute(other.to_string())),
        }
        Ok(())
    }

    /// Waits until `state == On`, or returns immediately if it already is.
    /// Used by the controller's idle loop.
    pub fn wait_until_on(&self) -> Tunables {
        let mut t = self.tunables.lock();
        while t.state != RunState::On {
            self.state_changed.wait(&mut t);
        }
        *t
    }

    /// Like [`Self::wait_until_on`], but also wakes on `stop` becoming
    /// true (instance shutdown). Returns `None` if
    /// stopped before `state` ever became `On`.
    pub fn wait_until_on_or_stopped(
        &self,
        stop: &std::sync::atomic::AtomicBool,
    ) -> Option<Tunables> {
        use std::sync::atomic::Ordering;
        let mut t = self.tunables.lock();
        while t.state != RunState::On {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            self.state_changed.wait(&mut t);
        }
        Some(*t)
    }

    /// Wakes any thread parked in [`Self::wait_until_on_or_stopped`],
    /// without changing `state`. Used by instance shutdown.
    pub fn wake_waiters(&self) {
        self.state_changed.notify_all();
    }

    /// Resets the per-round statistics before a round starts.
    pub fn reset_round_counters(&self) {
        let mut t = self.tunables.lock();
        t.ttime_ms = 0;
        t.resptime_us = 0;
        t.reqcount = 0;
        t.read_errs = 0;
    }

    pub fn update_round_stats(&self, ttime_ms: u64, resptime_us: u64, reqcount: u64, read_errs: u64) {
        let mut t = self.tunables.lock();
        t.ttime_ms = ttime_ms;
        t.resptime_us = resptime_us;
        t.reqcount = reqcount;
        t.read_errs = read_errs;
    }

    pub fn increment_reqcount(&self) -> u64 {
        let mut t = self.tunables.lock();
        t.reqcount += 1;
        t.reqcount
    }

    pub fn current_state(&self) -> RunState {
        self.tunables.lock().state
    }
}

fn show_enum(selected: &str, all: &[&str]) -> String {
    let mut out = String::new();
    for (i, opt) in all.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if *opt == selected {
            out.push('[');
            out.push_str(opt);
            out.push(']');
        } else {
            out.push_str(opt);
        }
    }
    out.push('\n');
    out
}

/// Logs a rejected store at warn level. Invoked whenever a value fails to
/// parse or falls outside its attribute's valid range; the caller leaves
/// the previous value in place.
fn warn_invalid(attr: &str, value: &str) {
    log::warn!("invalid value {value:?} for attribute {attr}, retaining previous value");
}

/// Assigns `parsed` into `*field` if present, otherwise logs and leaves
/// `*field` untouched.
fn set_or_warn<T>(field: &mut T, parsed: Option<T>, attr: &str, value: &str) {
    match parsed {
        Some(v) => *field = v,
        None => warn_invalid(attr, value),
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.parse::<u64>().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn clamp_nonzero_kb(value: &str, capacity_sectors: u64) -> Option<u64> {
    let v = parse_u64(value)?;
    if v == 0 {
        return None;
    }
    Some(v.min(capacity_sectors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_marks_current_selection() {
        let cs = ControlSurface::new(1_000_000);
        assert_eq!(cs.show("strategy").unwrap(), "[seql] stag fixed\n");
        cs.store("strategy", "stag\n").unwrap();
        assert_eq!(cs.show("strategy").unwrap(), "seql [stag] fixed\n");
    }

    #[test]
    fn store_retains_previous_value_on_unknown_enum_value() {
        let cs = ControlSurface::new(1000);
        assert!(cs.store("strategy", "bogus").is_ok());
        // previous value retained, the bad write is merely logged
        assert_eq!(cs.show("strategy").unwrap(), "[seql] stag fixed\n");
    }

    #[test]
    fn store_rejects_unknown_attribute_name() {
        let cs = ControlSurface::new(1000);
        assert!(cs.store("not_a_real_attribute", "1").is_err());
    }

    #[test]
    fn spoint_reset_to_zero_above_capacity() {
        let cs = ControlSurface::new(1000);
        cs.store("spoint", "5000").unwrap();
        assert_eq!(cs.snapshot().spoint, 0);
    }

    #[test]
    fn scount_clamped_to_capacity() {
        let cs = ControlSurface::new(1000);
        cs.store("scount", "5000").unwrap();
        assert_eq!(cs.snapshot().scount, 1000);
    }

    #[test]
    fn segsize_zero_retains_previous_value() {
        let cs = ControlSurface::new(1000);
        let before = cs.snapshot().segsize;
        assert!(cs.store("segsize", "0").is_ok());
        assert_eq!(cs.snapshot().segsize, before);
    }

    #[test]
    fn vrprotect_out_of_range_retains_previous_value() {
        let cs = ControlSurface::new(1000);
        assert!(cs.store("vrprotect", "8").is_ok());
        assert_eq!(cs.snapshot().vrprotect, 0);
        assert!(cs.store("vrprotect", "7").is_ok());
        assert_eq!(cs.snapshot().vrprotect, 7);
    }

    #[test]
    fn show_store_round_trip_is_noop() {
        let cs = ControlSurface::new(1000);
        cs.store("threads", "8").unwrap();
        let shown = cs.show("threads").unwrap();
        cs.store("threads", shown.trim()).unwrap();
        assert_eq!(cs.snapshot().threads, 8);
    }
}
