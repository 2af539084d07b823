// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Traversal strategies: pure functions over a device's sector
//! range that call back into the dispatcher once per emitted segment.

use crate::control::Strategy;

/// Returned by the dispatch callback to tell a strategy whether to keep
/// emitting segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continue {
    Yes,
    Stop,
}

const FIXED_WINDOW_SECTORS: u64 = 40_000_000;
const FIXED_STEP_SECTORS: u64 = 400_000;
const FIXED_SEGMENT_COUNT: u32 = 50;
const FIXED_MIN_CAPACITY: u64 = 40_000_001;

/// Computes `ceil(a / b)` for the region/segment counts in the staggered
/// strategy, without risking overflow on the addition form.
fn ceil_div(a: u64, b: u64) -> u64 {
    if a == 0 {
        0
    } else {
        (a - 1) / b + 1
    }
}

/// Clamps a segment's length so it never runs past `effective_end`.
/// Returns `None` if `lba` is
/// already at or past the end (nothing left to emit).
fn clamp_segment(lba: u64, segsize: u64, effective_end: u64, capacity: u64) -> Option<u32> {
    if lba >= effective_end {
        return None;
    }
    let remaining = effective_end - lba;
    let len = if segsize <= capacity {
        remaining.min(segsize)
    } else {
        // segsize larger than the whole device: emit what's left of it
        // without backtracking to `capacity - segsize`.
        capacity.min(remaining)
    };
    Some(len as u32)
}

/// Runs the `Seql` strategy: a linear sweep from `spoint` to `effective_end`.
pub fn run_sequential(
    spoint: u64,
    effective_end: u64,
    segsize: u64,
    capacity: u64,
    mut emit: impl FnMut(u64, u32) -> Continue,
) {
    let mut lba = spoint;
    while lba < effective_end {
        let Some(count) = clamp_segment(lba, segsize, effective_end, capacity) else {
            break;
        };
        if emit(lba, count) == Continue::Stop {
            return;
        }
        lba += count as u64;
    }
}

/// Runs the `Stag` strategy: interleaves the s-th segment of every region
/// before the (s+1)-th segment of any region.
pub fn run_staggered(
    spoint: u64,
    effective_end: u64,
    segsize: u64,
    regsize: u64,
    capacity: u64,
    mut emit: impl FnMut(u64, u32) -> Continue,
) {
    let span = effective_end.saturating_sub(spoint);
    let regnum = ceil_div(span, regsize);
    let segnum = ceil_div(regsize, segsize);

    for s in 0..segnum {
        for r in 0..regnum {
            let lba = spoint + r * regsize + s * segsize;
            if lba >= effective_end {
                continue;
            }
            let region_end = (spoint + (r + 1) * regsize).min(effective_end);
            let Some(count) = clamp_segment(lba, segsize, region_end, capacity) else {
                continue;
            };
            if emit(lba, count) == Continue::Stop {
                return;
            }
        }
    }
}

/// Runs the `Fixed` diagnostic strategy: 50 segments over the first 20 GB,
/// alternating between the low and high end of that window. Returns
/// `Err(())` if the device is too small for the fixed window.
pub fn run_fixed(
    capacity: u64,
    segsize: u64,
    mut emit: impl FnMut(u64, u32) -> Continue,
) -> Result<(), ()> {
    if capacity < FIXED_MIN_CAPACITY {
        return Err(());
    }
    for i in 0..FIXED_SEGMENT_COUNT {
        let lba = if i % 2 == 0 {
            (i / 2) as u64 * FIXED_STEP_SECTORS
        } else {
            FIXED_WINDOW_SECTORS - ((i - 1) / 2) as u64 * FIXED_STEP_SECTORS
        };
        let count = segsize.min(capacity - lba) as u32;
        if emit(lba, count) == Continue::Stop {
            return Ok(());
        }
    }
    Ok(())
}

/// Dispatches to the selected strategy. `capacity` is the device's true
/// capacity (used for the non-backtracking oversized-segment rule and the
/// `Fixed` size gate); `effective_end` is `min(spoint + scount, capacity)`
/// already resolved by the caller.
pub fn run(
    strategy: Strategy,
    spoint: u64,
    effective_end: u64,
    segsize: u64,
    regsize: u64,
    capacity: u64,
    emit: impl FnMut(u64, u32) -> Continue,
) -> Result<(), ()> {
    match strategy {
        Strategy::Seql => {
            run_sequential(spoint, effective_end, segsize, capacity, emit);
            Ok(())
        }
        Strategy::Stag => {
            run_staggered(spoint, effective_end, segsize, regsize, capacity, emit);
            Ok(())
        }
        Strategy::Fixed => run_fixed(capacity, segsize, emit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_sequential(
        spoint: u64,
        effective_end: u64,
        segsize: u64,
        capacity: u64,
    ) -> Vec<(u64, u32)> {
        let mut out = Vec::new();
        run_sequential(spoint, effective_end, segsize, capacity, |lba, count| {
            out.push((lba, count));
            Continue::Yes
        });
        out
    }

    fn collect_staggered(
        spoint: u64,
        effective_end: u64,
        segsize: u64,
        regsize: u64,
        capacity: u64,
    ) -> Vec<(u64, u32)> {
        let mut out = Vec::new();
        run_staggered(
            spoint,
            effective_end,
            segsize,
            regsize,
            capacity,
            |lba, count| {
                out.push((lba, count));
                Continue::Yes
            },
        );
        out
    }

    #[test]
    fn boundary_scenario_1() {
        assert_eq!(
            collect_sequential(0, 1000, 300, 1000),
            vec![(0, 300), (300, 300), (600, 300), (900, 100)]
        );
    }

    #[test]
    fn boundary_scenario_2() {
        assert_eq!(
            collect_sequential(100, 600, 200, 1000),
            vec![(100, 200), (300, 200), (500, 100)]
        );
    }

    #[test]
    fn boundary_scenario_3() {
        assert_eq!(
            collect_staggered(0, 1200, 100, 400, 1200),
            vec![
                (0, 100),
                (400, 100),
                (800, 100),
                (100, 100),
                (500, 100),
                (900, 100),
                (200, 100),
                (600, 100),
                (1000, 100),
                (300, 100),
                (700, 100),
                (1100, 100),
            ]
        );
    }

    #[test]
    fn sequential_coverage_is_exact_and_unique() {
        let segments = collect_sequential(37, 10_037, 257, 20_000);
        let mut covered = Vec::new();
        for (lba, count) in &segments {
            for s in *lba..*lba + *count as u64 {
                covered.push(s);
            }
        }
        covered.sort_unstable();
        let expected: Vec<u64> = (37..10_037).collect();
        assert_eq!(covered, expected);
    }

    #[test]
    fn staggered_coverage_is_exact_and_unique() {
        let segments = collect_staggered(0, 5_000, 173, 971, 5_000);
        let mut covered = Vec::new();
        for (lba, count) in &segments {
            for s in *lba..*lba + *count as u64 {
                covered.push(s);
            }
        }
        covered.sort_unstable();
        let expected: Vec<u64> = (0..5_000).collect();
        assert_eq!(covered, expected);
    }

    #[test]
    fn staggered_interleave_orders_first_segments_before_second() {
        // regsize=400 segsize=100 => 4 segments/region; region 0's 1st
        // segment (lba 0) must precede region 1's 2nd segment (lba 500).
        let segments = collect_staggered(0, 1200, 100, 400, 1200);
        let pos = |target: (u64, u32)| segments.iter().position(|&s| s == target).unwrap();
        assert!(pos((0, 100)) < pos((500, 100)));
    }

    #[test]
    fn request_bound_stops_after_overshoot() {
        let mut count = 0u64;
        run_sequential(0, 1_000_000, 10, 1_000_000, |_, _| {
            count += 1;
            if count > 10 {
                Continue::Stop
            } else {
                Continue::Yes
            }
        });
        assert_eq!(count, 11);
    }

    #[test]
    fn fixed_requires_minimum_capacity() {
        assert!(run_fixed(40_000_000, 1000, |_, _| Continue::Yes).is_err());
        assert!(run_fixed(40_000_001, 1000, |_, _| Continue::Yes).is_ok());
    }

    #[test]
    fn fixed_alternates_low_and_high_ends() {
        let mut segments = Vec::new();
        run_fixed(50_000_000, 1000, |lba, count| {
            segments.push((lba, count));
            Continue::Yes
        })
        .unwrap();
        assert_eq!(segments.len(), 50);
        assert_eq!(segments[0].0, 0);
        assert_eq!(segments[1].0, 40_000_000);
        assert_eq!(segments[2].0, 400_000);
        assert_eq!(segments[3].0, 39_600_000);
    }
}
