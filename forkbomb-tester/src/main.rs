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

//! Bounded fork-pressure generator for manually exercising forkbombd.
//!
//! Run it inside a cgroup with a small `pids.max`: every fork beyond the
//! limit fails and bumps the cgroup's `pids.events`, which is exactly the
//! signal forkbombd watches. The iteration count bounds the pressure.

use clap::Parser;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct TesterOptions {
    /// How many forks to attempt.
    iteration_count: u32,
}

fn main() {
    let options = TesterOptions::parse();

    let mut children = Vec::with_capacity(options.iteration_count as usize);
    for _ in 0..options.iteration_count {
        // SAFETY: both sides of the fork only touch their own memory and
        // plain syscalls; no locks are held across the fork.
        match unsafe { fork() } {
            // The child keeps forking through the remaining iterations,
            // starting its own brood.
            Ok(ForkResult::Child) => children.clear(),
            Ok(ForkResult::Parent { child }) => children.push(child),
            Err(e) => eprintln!("Could not fork: {e}"),
        }
    }

    for child in children.into_iter().rev() {
        if let Err(e) = waitpid(child, None) {
            eprintln!("Could not wait for pid {child}: {e}");
        }
    }
}
