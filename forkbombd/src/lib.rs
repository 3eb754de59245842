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

//! Supervisor daemon that detects fork bombs inside cgroup v2 hierarchies
//! and kills the offending cgroup before the process table drowns.
//!
//! The kernel rewrites a cgroup's `pids.events` file every time a fork
//! fails against that cgroup's `pids.max` limit. forkbombd keeps an
//! inotify watch on every such file below a configured slice, counts
//! rewrites per cgroup in a sliding window, and writes into the cgroup's
//! `cgroup.kill` once the count crosses the configured threshold.
//!
//! The whole daemon is one event loop on one thread; the only blocking
//! point is the read on the inotify descriptor.
// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use crate::config::ValidatedConfig;
use crate::notify::Notifier;
use crate::rate::RateEngine;
use crate::tracker::{TrackerError, TreeTracker};
use crate::watch::{Inotify, WatchError};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod config;
pub mod init;
pub mod notify;
pub mod rate;
pub mod tracker;
pub mod watch;

/// Leaf file the kernel rewrites on every failed fork in a cgroup.
pub const PIDS_EVENTS_FILE: &str = "pids.events";

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl DaemonError {
    /// Errno behind the failure, for supervisor error reporting.
    pub fn errno(&self) -> Option<i32> {
        match self {
            DaemonError::Watch(e) => e.errno().map(|errno| errno as i32),
            DaemonError::Tracker(TrackerError::Watch(e)) => {
                e.errno().map(|errno| errno as i32)
            }
            DaemonError::Tracker(TrackerError::FailedToEnumerate {
                source, ..
            }) => source.raw_os_error(),
            DaemonError::Tracker(TrackerError::CreateWithoutName) => None,
        }
    }
}

/// One running supervisor instance.
pub struct ForkbombdRuntime {
    config: ValidatedConfig,
    notifier: Arc<dyn Notifier>,
}

impl Debug for ForkbombdRuntime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkbombdRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ForkbombdRuntime {
    pub fn new(config: ValidatedConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self { config, notifier }
    }

    /// Run the supervisor until a fatal error.
    ///
    /// Steady state: pull one event, dispatch it. Every registry mutation,
    /// window update and kill happens on this thread in event order.
    pub fn run(&self) -> Result<()> {
        let mut inotify = Inotify::open(Arc::clone(&self.notifier))?;

        let rate = RateEngine::new(
            self.config.window_seconds,
            self.config.event_threshold,
        );
        rate.register_removal_listener(&mut inotify);

        let tracker =
            TreeTracker::new(PIDS_EVENTS_FILE, self.config.excludes.clone());

        let root = self.config.monitored_root();
        info!("Indexing cgroups below {}", root.display());
        tracker.populate_recursively(&mut inotify, &root)?;
        info!("Watching {} paths", inotify.watch_count());

        self.notifier.ready();

        loop {
            let event = inotify.read_event()?;
            tracker.dispatch(&mut inotify, &rate, event)?;
        }
    }
}
