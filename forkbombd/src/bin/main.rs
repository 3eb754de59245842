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

use clap::Parser;
use forkbombd::config::{self, Config};
use forkbombd::init::logging;
use forkbombd::{notify, ForkbombdRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Exit code when the daemon dies of a fatal error.
const EXIT_ERROR: i32 = 1;

/// Command line options for forkbombd.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ForkbombdOptions {
    /// Path where the cgroup2 filesystem is mounted. Defaults to /sys/fs/cgroup.
    #[clap(short = 'c', long = "cgroup-mnt", value_parser)]
    cgroup_mnt: Option<PathBuf>,
    /// Slice below the mount in which all cgroups are indexed. Defaults to /user.slice/.
    #[clap(short, long, value_parser)]
    slice: Option<String>,
    /// Window length in seconds for counting failed forks. Defaults to 10.
    #[clap(short, long, value_parser)]
    window_seconds: Option<f64>,
    /// Failed forks per window before the offending cgroup is killed. Defaults to 50.
    #[clap(short = 't', long, value_parser)]
    event_threshold: Option<u32>,
    /// Absolute path that must never be watched, subtree included. May be
    /// given more than once. Defaults to <cgroup-mnt>/user.slice/user-0.slice.
    #[clap(long = "exclude", value_parser)]
    excludes: Vec<PathBuf>,
    /// Toggle verbosity. The LOGGER environment variable wins over this.
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let options = ForkbombdOptions::parse();

    if let Err(e) = logging::init(logging::logger_level(options.verbose)) {
        eprintln!("Could not set up logging: {e}");
        std::process::exit(EXIT_ERROR);
    }

    info!("Starting forkbombd");
    info!("forkbombd is pid {}", std::process::id());

    let ForkbombdOptions {
        cgroup_mnt,
        slice,
        window_seconds,
        event_threshold,
        excludes,
        verbose: _,
    } = options;

    let defaults = Config::default();
    let cgroup_root = cgroup_mnt.unwrap_or(defaults.cgroup_root);
    let excludes = if excludes.is_empty() {
        config::default_excludes(&cgroup_root)
    } else {
        excludes
    };

    let config = Config {
        cgroup_root,
        slice: slice.unwrap_or(defaults.slice),
        window_seconds: window_seconds.unwrap_or(defaults.window_seconds),
        event_threshold: event_threshold.unwrap_or(defaults.event_threshold),
        excludes,
    };

    let config = match config.validate() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(EXIT_ERROR);
        }
    };

    let notifier = notify::from_environment();
    let runtime = ForkbombdRuntime::new(config, Arc::clone(&notifier));

    if let Err(e) = runtime.run() {
        error!("{e}");
        if let Some(errno) = e.errno() {
            notifier.errno(errno);
        }
    }
    std::process::exit(EXIT_ERROR);
}
