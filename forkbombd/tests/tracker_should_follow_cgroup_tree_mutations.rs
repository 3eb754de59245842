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

//! Drives the tracker against a real inotify instance over a temp
//! directory standing in for a cgroup slice.

use forkbombd::notify::NoopNotifier;
use forkbombd::rate::RateEngine;
use forkbombd::tracker::TreeTracker;
use forkbombd::watch::Inotify;
use forkbombd::PIDS_EVENTS_FILE;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Harness {
    inotify: Inotify,
    tracker: TreeTracker,
    rate: RateEngine,
}

impl Harness {
    fn new(root: &Path, excludes: Vec<PathBuf>) -> Self {
        let mut inotify = Inotify::open(Arc::new(NoopNotifier)).expect("inotify open");
        let rate = RateEngine::new(10.0, 100);
        rate.register_removal_listener(&mut inotify);
        let tracker = TreeTracker::new(PIDS_EVENTS_FILE, excludes);
        tracker
            .populate_recursively(&mut inotify, root)
            .expect("initial population");
        Self {
            inotify,
            tracker,
            rate,
        }
    }

    /// Dispatch queued events until `path` shows up in the registry.
    ///
    /// Creating `path` last makes this a barrier: once its create event
    /// has been dispatched, everything queued before it has been too.
    fn pump_until_watched(&mut self, path: &Path) {
        for _ in 0..64 {
            if self.inotify.handle_of(path).is_some() {
                return;
            }
            let event = self.inotify.read_event().expect("read event");
            self.tracker
                .dispatch(&mut self.inotify, &self.rate, event)
                .expect("dispatch");
        }
        panic!("{} never became watched", path.display());
    }
}

fn make_cgroup(dir: &Path) {
    fs::create_dir_all(dir).expect("mkdir");
    fs::write(dir.join(PIDS_EVENTS_FILE), "max 0\n").expect("leaf file");
}

#[test]
fn initial_population_covers_dirs_and_leaves_but_not_excludes() {
    let root = tempfile::tempdir().expect("tempdir");
    fs::write(root.path().join(PIDS_EVENTS_FILE), "max 0\n").expect("leaf");
    make_cgroup(&root.path().join("a"));
    make_cgroup(&root.path().join("a/b"));
    make_cgroup(&root.path().join("excluded"));

    let excludes = vec![root.path().join("excluded")];
    let harness = Harness::new(root.path(), excludes);

    for watched in [
        root.path().to_path_buf(),
        root.path().join(PIDS_EVENTS_FILE),
        root.path().join("a"),
        root.path().join("a").join(PIDS_EVENTS_FILE),
        root.path().join("a/b"),
        root.path().join("a/b").join(PIDS_EVENTS_FILE),
    ] {
        assert!(
            harness.inotify.handle_of(&watched).is_some(),
            "{} should be watched",
            watched.display()
        );
    }
    for skipped in [
        root.path().join("excluded"),
        root.path().join("excluded").join(PIDS_EVENTS_FILE),
    ] {
        assert!(
            harness.inotify.handle_of(&skipped).is_none(),
            "{} must not be watched",
            skipped.display()
        );
    }
    assert_eq!(harness.inotify.watch_count(), 6);
}

#[test]
fn directories_created_after_startup_are_picked_up() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut harness = Harness::new(root.path(), Vec::new());

    // A fresh cgroup appears...
    let new_dir = root.path().join("session-1.scope");
    fs::create_dir(&new_dir).expect("mkdir");
    harness.pump_until_watched(&new_dir);

    // ...and the kernel materializes its control files.
    let new_leaf = new_dir.join(PIDS_EVENTS_FILE);
    fs::write(&new_leaf, "max 0\n").expect("leaf");
    harness.pump_until_watched(&new_leaf);

    // The first modification opens a window, nothing more.
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&new_leaf)
        .expect("open leaf");
    file.write_all(b"max 1\n").expect("append");
    drop(file);

    let event = harness.inotify.read_event().expect("modify event");
    harness
        .tracker
        .dispatch(&mut harness.inotify, &harness.rate, event)
        .expect("dispatch modify");
    assert_eq!(harness.rate.window_count(), 1);
}

#[test]
fn removed_subtrees_vanish_from_registry_and_windows() {
    let root = tempfile::tempdir().expect("tempdir");
    make_cgroup(&root.path().join("doomed"));
    let mut harness = Harness::new(root.path(), Vec::new());

    let doomed_leaf = root.path().join("doomed").join(PIDS_EVENTS_FILE);

    // Open a window for the leaf so there is something to purge.
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&doomed_leaf)
        .expect("open leaf");
    file.write_all(b"max 1\n").expect("append");
    drop(file);
    let event = harness.inotify.read_event().expect("modify event");
    harness
        .tracker
        .dispatch(&mut harness.inotify, &harness.rate, event)
        .expect("dispatch modify");
    assert_eq!(harness.rate.window_count(), 1);

    fs::remove_dir_all(root.path().join("doomed")).expect("rmdir");

    // Fence: everything queued by the removal sits before this create.
    let fence = root.path().join("fence");
    fs::create_dir(&fence).expect("mkdir fence");
    harness.pump_until_watched(&fence);

    assert!(harness.inotify.handle_of(&root.path().join("doomed")).is_none());
    assert!(harness.inotify.handle_of(&doomed_leaf).is_none());
    assert_eq!(harness.rate.window_count(), 0);
}

#[test]
fn excluded_subtrees_stay_unwatched_even_when_created_later() {
    let root = tempfile::tempdir().expect("tempdir");
    let excluded = root.path().join("user-0.slice");
    let mut harness = Harness::new(root.path(), vec![excluded.clone()]);

    make_cgroup(&excluded);

    let fence = root.path().join("fence");
    fs::create_dir(&fence).expect("mkdir fence");
    harness.pump_until_watched(&fence);

    assert!(harness.inotify.handle_of(&excluded).is_none());
    assert!(harness
        .inotify
        .handle_of(&excluded.join(PIDS_EVENTS_FILE))
        .is_none());
}
