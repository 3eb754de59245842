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

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

const KILL_FILE: &str = "cgroup.kill";

const STAT_FILES: [&str; 4] = ["pids.current", "pids.peak", "pids.max", "pids.events"];

/// Kill every task in the cgroup owning `leaf_path` by writing `1\n` into
/// its `cgroup.kill`.
///
/// Every failure is logged and swallowed: a cgroup that vanished between
/// the event and the write is routine, and the supervisor must outlive it.
pub(crate) fn kill_cgroup(leaf_path: &Path) {
    let Some(cgroup_dir) = leaf_path.parent() else {
        error!(
            "Could not kill: '{}' has no parent directory",
            leaf_path.display()
        );
        return;
    };

    info!("Killing cgroup \"{}\"...", cgroup_dir.display());
    log_pids_stats(cgroup_dir);

    let kill_path = cgroup_dir.join(KILL_FILE);
    let mut file = match OpenOptions::new().write(true).open(&kill_path) {
        Ok(file) => file,
        Err(e) => {
            error!(
                "Could not kill: open \"{}\" as write-only failed: {e}",
                kill_path.display()
            );
            return;
        }
    };

    // One write of exactly these two bytes; anything else the kernel side
    // would reject.
    match file.write(b"1\n") {
        Ok(2) => {}
        Ok(n_bytes) => error!(
            "Could not kill: writing 2 bytes into cgroup.kill resulted in only {n_bytes} bytes written?"
        ),
        Err(e) => {
            error!("Could not kill: writing \"1\\n\" into cgroup.kill failed: {e}")
        }
    }
}

/// Best-effort snapshot of the cgroup's pid accounting for the log.
fn log_pids_stats(cgroup_dir: &Path) {
    let mut values = Vec::with_capacity(STAT_FILES.len());
    for name in STAT_FILES {
        match fs::read_to_string(cgroup_dir.join(name)) {
            Ok(content) => values.push(content.replace('\n', "")),
            Err(e) => {
                error!("Could not log additional parameters about cgroup being killed: {e}");
                return;
            }
        }
    }
    info!(
        "pids.current = {}, pids.peak = {}, pids.max = {}, pids.events = {}",
        values[0], values[1], values[2], values[3]
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_writes_exactly_the_kill_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leaf = dir.path().join("pids.events");
        fs::write(&leaf, "max 7\n").expect("leaf");
        fs::write(dir.path().join("cgroup.kill"), "").expect("kill file");

        kill_cgroup(&leaf);

        let written = fs::read(dir.path().join("cgroup.kill")).expect("read back");
        assert_eq!(written, b"1\n");
    }

    #[test]
    fn test_missing_kill_file_is_suppressed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leaf = dir.path().join("pids.events");
        fs::write(&leaf, "max 7\n").expect("leaf");

        // No cgroup.kill in the directory; must log and return.
        kill_cgroup(&leaf);
        assert!(!dir.path().join("cgroup.kill").exists());
    }

    #[test]
    fn test_stats_snapshot_does_not_gate_the_kill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let leaf = dir.path().join("pids.events");
        fs::write(&leaf, "max 7\n").expect("leaf");
        fs::write(dir.path().join("cgroup.kill"), "").expect("kill file");
        // pids.current / pids.peak / pids.max are absent.

        kill_cgroup(&leaf);

        let written = fs::read(dir.path().join("cgroup.kill")).expect("read back");
        assert_eq!(written, b"1\n");
    }
}
