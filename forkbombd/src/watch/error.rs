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

use super::WatchHandle;
use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("could not create inotify file descriptor: {source}")]
    FailedToCreate { source: Errno },
    #[error("could not add watch for '{path}': {source}")]
    FailedToAdd { path: PathBuf, source: Errno },
    #[error("parent watch {parent} is not registered")]
    UnknownParent { parent: WatchHandle },
    #[error("could not remove watch for '{path}': {source}")]
    FailedToRemove { path: PathBuf, source: Errno },
    #[error("watch {handle} is not registered")]
    UnknownWatch { handle: WatchHandle },
    #[error("path '{path}' is not watched")]
    PathNotWatched { path: PathBuf },
    #[error("could not read events from inotify file descriptor: {source}")]
    ReadFailed { source: Errno },
    #[error("inotify file descriptor signalled end of file")]
    UnexpectedEof,
}

impl WatchError {
    /// True for an add that failed only because the target is already gone.
    pub fn is_enoent(&self) -> bool {
        matches!(
            self,
            WatchError::FailedToAdd { source: Errno::ENOENT, .. }
        )
    }

    /// Errno behind this error, when the kernel supplied one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            WatchError::FailedToCreate { source }
            | WatchError::FailedToAdd { source, .. }
            | WatchError::FailedToRemove { source, .. }
            | WatchError::ReadFailed { source } => Some(*source),
            WatchError::UnknownParent { .. }
            | WatchError::UnknownWatch { .. }
            | WatchError::PathNotWatched { .. }
            | WatchError::UnexpectedEof => None,
        }
    }
}
