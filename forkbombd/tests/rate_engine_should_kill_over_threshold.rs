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

//! End to end: enough rewrites of a pids.events file inside one window
//! must put `1\n` into the sibling cgroup.kill, and nothing before that.

use forkbombd::notify::NoopNotifier;
use forkbombd::rate::RateEngine;
use forkbombd::tracker::TreeTracker;
use forkbombd::watch::Inotify;
use forkbombd::PIDS_EVENTS_FILE;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn touch_leaf(leaf: &Path) {
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(leaf)
        .expect("open leaf");
    file.write_all(b"max 1\n").expect("append");
}

#[test]
fn threshold_breach_writes_the_kill_bytes() {
    let root = tempfile::tempdir().expect("tempdir");
    let cgroup = root.path().join("bomb.scope");
    fs::create_dir(&cgroup).expect("mkdir");
    let leaf = cgroup.join(PIDS_EVENTS_FILE);
    fs::write(&leaf, "max 0\n").expect("leaf");
    fs::write(cgroup.join("cgroup.kill"), "").expect("kill file");
    fs::write(cgroup.join("pids.current"), "9\n").expect("stat");
    fs::write(cgroup.join("pids.peak"), "10\n").expect("stat");
    fs::write(cgroup.join("pids.max"), "10\n").expect("stat");

    let mut inotify = Inotify::open(Arc::new(NoopNotifier)).expect("inotify open");
    let rate = RateEngine::new(10.0, 3);
    rate.register_removal_listener(&mut inotify);
    let tracker = TreeTracker::new(PIDS_EVENTS_FILE, Vec::new());
    tracker
        .populate_recursively(&mut inotify, root.path())
        .expect("populate");

    // Interleave writes and dispatches so every rewrite is its own event.
    for rewrites_seen in 1..=3u32 {
        touch_leaf(&leaf);
        let event = inotify.read_event().expect("modify event");
        tracker
            .dispatch(&mut inotify, &rate, event)
            .expect("dispatch");

        let kill_content = fs::read(cgroup.join("cgroup.kill")).expect("kill file");
        if rewrites_seen < 3 {
            assert_eq!(
                kill_content, b"",
                "no kill before the threshold is reached"
            );
        } else {
            assert_eq!(kill_content, b"1\n");
        }
    }
}

#[test]
fn a_vanished_cgroup_kill_file_does_not_stop_the_daemon() {
    let root = tempfile::tempdir().expect("tempdir");
    let cgroup = root.path().join("gone.scope");
    fs::create_dir(&cgroup).expect("mkdir");
    let leaf = cgroup.join(PIDS_EVENTS_FILE);
    fs::write(&leaf, "max 0\n").expect("leaf");
    // No cgroup.kill and no pids.* stats: every kill attempt can only log.

    let mut inotify = Inotify::open(Arc::new(NoopNotifier)).expect("inotify open");
    let rate = RateEngine::new(10.0, 2);
    rate.register_removal_listener(&mut inotify);
    let tracker = TreeTracker::new(PIDS_EVENTS_FILE, Vec::new());
    tracker
        .populate_recursively(&mut inotify, root.path())
        .expect("populate");

    for _ in 0..2 {
        touch_leaf(&leaf);
        let event = inotify.read_event().expect("modify event");
        tracker
            .dispatch(&mut inotify, &rate, event)
            .expect("dispatch survives failed kill");
    }
}
