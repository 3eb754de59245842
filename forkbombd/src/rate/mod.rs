/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Per-leaf sliding windows over failed-fork events, and the kill that
//! fires when a window fills up.

mod kill;

use crate::watch::{Inotify, WatchHandle};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Sliding window over the modify events of one leaf file.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    window_start: Instant,
    event_count: u64,
}

/// Counts leaf modifications per watch and kills the owning cgroup when
/// too many land inside one window.
#[derive(Debug)]
pub struct RateEngine {
    windows: Rc<RefCell<HashMap<WatchHandle, WindowEntry>>>,
    window: Duration,
    event_threshold: u64,
}

impl RateEngine {
    pub fn new(window_seconds: f64, event_threshold: u32) -> Self {
        Self {
            windows: Rc::default(),
            window: Duration::from_secs_f64(window_seconds),
            event_threshold: u64::from(event_threshold),
        }
    }

    /// Drop a leaf's window whenever its watch dies. This listener is the
    /// only place window entries are freed, which bounds the map by the
    /// number of live leaf watches.
    pub fn register_removal_listener(&self, inotify: &mut Inotify) {
        let windows = Rc::clone(&self.windows);
        inotify.add_removal_listener(Box::new(move |handle, _path| {
            let _ = windows.borrow_mut().remove(&handle);
        }));
    }

    /// Account one modify event of the leaf behind `watch`, killing the
    /// owning cgroup when the window fills up.
    pub fn on_leaf_modified(&self, watch: WatchHandle, leaf_path: &Path, now: Instant) {
        if self.record(watch, now) {
            kill::kill_cgroup(leaf_path);
        }
    }

    /// Number of leaves currently inside an open window.
    pub fn window_count(&self) -> usize {
        self.windows.borrow().len()
    }

    /// Window bookkeeping. Returns whether the threshold was crossed.
    ///
    /// The first event for a leaf only opens its window. An expired window
    /// restarts without counting the event that exposed the expiry, so
    /// counting resumes with the next one. A kill resets the count but
    /// keeps the window start.
    fn record(&self, watch: WatchHandle, now: Instant) -> bool {
        let mut windows = self.windows.borrow_mut();
        match windows.entry(watch) {
            Entry::Vacant(vacant) => {
                trace!("New window for watch={watch}");
                let _ = vacant.insert(WindowEntry {
                    window_start: now,
                    event_count: 1,
                });
                false
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                trace!(
                    "Window of watch={watch} started {:?} ago and has had {} events since",
                    now.duration_since(entry.window_start),
                    entry.event_count
                );
                if now.duration_since(entry.window_start) > self.window {
                    entry.window_start = now;
                    entry.event_count = 0;
                    false
                } else {
                    entry.event_count += 1;
                    if entry.event_count >= self.event_threshold {
                        entry.event_count = 0;
                        true
                    } else {
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: i32) -> WatchHandle {
        WatchHandle::from_raw(raw)
    }

    /// Feeds events at the given offsets (seconds) and returns the kill
    /// decisions, one per event.
    fn run_events(engine: &RateEngine, offsets: &[f64]) -> Vec<bool> {
        let base = Instant::now();
        offsets
            .iter()
            .map(|offset| {
                engine.record(handle(1), base + Duration::from_secs_f64(*offset))
            })
            .collect()
    }

    #[test]
    fn test_threshold_reached_within_window_kills() {
        let engine = RateEngine::new(10.0, 3);
        assert_eq!(
            run_events(&engine, &[0.0, 1.0, 2.0]),
            vec![false, false, true]
        );
    }

    #[test]
    fn test_expired_window_resets_without_counting() {
        let engine = RateEngine::new(10.0, 3);
        // The window opened at t=0 is stale by t=11; the event at t=11
        // only restarts it, so the one at t=12 is the first counted.
        assert_eq!(
            run_events(&engine, &[0.0, 5.0, 11.0, 12.0]),
            vec![false, false, false, false]
        );
    }

    #[test]
    fn test_event_on_window_boundary_still_counts() {
        let engine = RateEngine::new(10.0, 2);
        assert_eq!(run_events(&engine, &[0.0, 10.0]), vec![false, true]);
        assert_eq!(
            run_events(&RateEngine::new(10.0, 2), &[0.0, 10.001]),
            vec![false, false]
        );
    }

    #[test]
    fn test_kill_resets_count_but_not_window_start() {
        let engine = RateEngine::new(10.0, 2);
        // Second kill needs two more events inside the original window.
        assert_eq!(
            run_events(&engine, &[0.0, 1.0, 2.0, 3.0]),
            vec![false, true, false, true]
        );
    }

    #[test]
    fn test_windows_are_tracked_per_watch() {
        let engine = RateEngine::new(10.0, 2);
        let base = Instant::now();
        assert!(!engine.record(handle(1), base));
        assert!(!engine.record(handle(2), base));
        assert!(engine.record(handle(1), base + Duration::from_secs(1)));
        assert_eq!(engine.window_count(), 2);
    }
}
