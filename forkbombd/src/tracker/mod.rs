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

//! Keeps watch coverage complete over a mutating directory tree: every
//! directory below the configured root, plus every leaf file carrying the
//! configured name.

use crate::rate::RateEngine;
use crate::watch::{Event, EventMask, Inotify, WatchError, WatchHandle};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::trace;

/// Everything that changes the set of children, plus the end of the
/// watched directory itself.
const DIR_WATCH_MASK: EventMask = EventMask::MOVED_FROM
    .union(EventMask::MOVED_TO)
    .union(EventMask::CREATE)
    .union(EventMask::DELETE)
    .union(EventMask::DELETE_SELF)
    .union(EventMask::MOVE_SELF);

const LEAF_WATCH_MASK: EventMask = EventMask::MODIFY;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("kernel delivered a create event without a child name")]
    CreateWithoutName,
    #[error("could not enumerate directory '{dir}': {source}")]
    FailedToEnumerate { dir: PathBuf, source: io::Error },
    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl TrackerError {
    fn is_enoent(&self) -> bool {
        matches!(self, TrackerError::Watch(e) if e.is_enoent())
    }
}

/// What a raw event means to this daemon.
#[derive(Debug)]
enum TrackedEvent {
    DirectoryCreated { path: PathBuf },
    LeafCreated { parent: WatchHandle, name: OsString },
    LeafModified { watch: WatchHandle, leaf_path: PathBuf },
    Other,
}

#[derive(Debug, Clone)]
pub struct TreeTracker {
    leaf_name: OsString,
    excludes: Vec<PathBuf>,
}

impl TreeTracker {
    pub fn new(leaf_name: impl Into<OsString>, excludes: Vec<PathBuf>) -> Self {
        Self {
            leaf_name: leaf_name.into(),
            excludes,
        }
    }

    /// Watch `dir` and everything below it.
    ///
    /// The directory watch is installed before the children are listed:
    /// anything created once the watch exists produces a create event, so
    /// no entry can slip between enumeration and installation. The reverse
    /// order would. Entries both listed here and announced by an event
    /// converge because the kernel hands out the existing descriptor for
    /// an already watched path.
    ///
    /// A subtree that vanishes mid-walk is abandoned silently.
    pub fn populate_recursively(&self, inotify: &mut Inotify, dir: &Path) -> Result<()> {
        if self.is_excluded(dir) {
            trace!("Skipping excluded dir {}", dir.display());
            return Ok(());
        }

        let watch = inotify.add_watch(dir, DIR_WATCH_MASK)?;
        trace!("Adding dir {} (watch={watch})", dir.display());

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("...and it has been removed again before it could be listed.");
                return Ok(());
            }
            Err(source) => {
                return Err(TrackerError::FailedToEnumerate {
                    dir: dir.to_path_buf(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(source) => {
                    return Err(TrackerError::FailedToEnumerate {
                        dir: dir.to_path_buf(),
                        source,
                    })
                }
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(TrackerError::FailedToEnumerate {
                        dir: dir.to_path_buf(),
                        source,
                    })
                }
            };

            if file_type.is_dir() {
                match self.populate_recursively(inotify, &entry.path()) {
                    Err(e) if e.is_enoent() => {
                        trace!("-> Could not add, does not exist anymore.")
                    }
                    result => result?,
                }
            } else if file_type.is_file() && entry.file_name() == self.leaf_name {
                self.add_leaf_watch(inotify, &entry.path())?;
            }
        }

        Ok(())
    }

    /// React to one enriched event, keeping the watch set and the rate
    /// engine in sync with the tree.
    pub fn dispatch(
        &self,
        inotify: &mut Inotify,
        rate: &RateEngine,
        event: Event,
    ) -> Result<()> {
        match self.classify(&event)? {
            TrackedEvent::DirectoryCreated { path } => {
                match self.populate_recursively(inotify, &path) {
                    Err(e) if e.is_enoent() => {
                        trace!("-> Could not add, does not exist anymore.");
                        Ok(())
                    }
                    result => result,
                }
            }
            TrackedEvent::LeafCreated { parent, name } => {
                let Some(parent_path) = inotify.path_of(parent) else {
                    return Ok(());
                };
                if self.is_excluded(&parent_path.join(&name)) {
                    return Ok(());
                }
                match inotify.add_watch_relative(&name, parent, LEAF_WATCH_MASK) {
                    Ok(watch) => {
                        trace!("Added leaf {name:?} (watch={watch})");
                        Ok(())
                    }
                    Err(e) if e.is_enoent() => {
                        trace!("-> Could not add, does not exist anymore.");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            TrackedEvent::LeafModified { watch, leaf_path } => {
                rate.on_leaf_modified(watch, &leaf_path, Instant::now());
                Ok(())
            }
            TrackedEvent::Other => Ok(()),
        }
    }

    fn classify(&self, event: &Event) -> Result<TrackedEvent> {
        if event.mask.contains(EventMask::CREATE) {
            let name = event.name.as_ref().ok_or(TrackerError::CreateWithoutName)?;
            if event.mask.contains(EventMask::ISDIR) {
                return Ok(TrackedEvent::DirectoryCreated {
                    path: event.path_of_watch.join(name),
                });
            }
            if *name == self.leaf_name {
                return Ok(TrackedEvent::LeafCreated {
                    parent: event.watch,
                    name: name.clone(),
                });
            }
            return Ok(TrackedEvent::Other);
        }

        if event.mask.contains(EventMask::MODIFY)
            && event.path_of_watch.file_name() == Some(self.leaf_name.as_os_str())
        {
            return Ok(TrackedEvent::LeafModified {
                watch: event.watch,
                leaf_path: event.path_of_watch.clone(),
            });
        }

        // MOVED_FROM / MOVED_TO carry the same information as the eventual
        // IN_IGNORED on the dropped watch, DELETE* is handled there too.
        Ok(TrackedEvent::Other)
    }

    fn add_leaf_watch(&self, inotify: &mut Inotify, leaf: &Path) -> Result<()> {
        if self.is_excluded(leaf) {
            return Ok(());
        }
        match inotify.add_watch(leaf, LEAF_WATCH_MASK) {
            Ok(watch) => trace!("Adding leaf {} (watch={watch})", leaf.display()),
            Err(e) if e.is_enoent() => {
                trace!("-> Could not add, does not exist anymore.")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excludes
            .iter()
            .any(|exclude| is_inside_dir(exclude, path))
    }
}

/// Lexical is-ancestor check over normalized components; a path counts as
/// inside itself.
fn is_inside_dir(higher: &Path, lower: &Path) -> bool {
    let mut lower_components = lower.components();
    higher
        .components()
        .all(|component| lower_components.next() == Some(component))
}
