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
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

/// Invoked once for every watch that goes away, with the handle and the
/// path it was registered under.
pub type RemovalListener = Box<dyn Fn(WatchHandle, &Path)>;

/// Bidirectional index of live watches.
///
/// Invariant: `by_handle` and `by_path` are exact inverses at every
/// observable moment, and no two handles map to the same path.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    by_handle: HashMap<WatchHandle, PathBuf>,
    by_path: HashMap<PathBuf, WatchHandle>,
    removal_listeners: Vec<RemovalListener>,
}

impl Debug for WatchRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("by_handle", &self.by_handle)
            .field("removal_listeners", &self.removal_listeners.len())
            .finish()
    }
}

impl WatchRegistry {
    /// Record a watch. Re-inserting a live `(handle, path)` pair is a
    /// no-op: the kernel hands back the existing descriptor for a path
    /// that is already watched. Returns whether the set of live watches
    /// changed.
    pub(crate) fn insert(&mut self, handle: WatchHandle, path: PathBuf) -> bool {
        if self.by_handle.get(&handle) == Some(&path) {
            return false;
        }
        // A reused descriptor or re-registered path must not leave a stale
        // inverse entry behind.
        if let Some(stale_path) = self.by_handle.remove(&handle) {
            let _ = self.by_path.remove(&stale_path);
        }
        if let Some(stale_handle) = self.by_path.remove(&path) {
            let _ = self.by_handle.remove(&stale_handle);
        }
        let _ = self.by_handle.insert(handle, path.clone());
        let _ = self.by_path.insert(path, handle);
        true
    }

    pub(crate) fn path_of(&self, handle: WatchHandle) -> Option<&Path> {
        self.by_handle.get(&handle).map(PathBuf::as_path)
    }

    pub(crate) fn handle_of(&self, path: &Path) -> Option<WatchHandle> {
        self.by_path.get(path).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub(crate) fn add_removal_listener(&mut self, listener: RemovalListener) {
        self.removal_listeners.push(listener);
    }

    /// Forget a watch, notifying every listener in registration order
    /// before the maps change, so listeners observe a consistent view.
    pub(crate) fn purge(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.by_handle.get(&handle)?.clone();
        for listener in &self.removal_listeners {
            listener(handle, &path);
        }
        let _ = self.by_handle.remove(&handle);
        let _ = self.by_path.remove(&path);
        Some(path)
    }
}
