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

use super::error::{Result, WatchError};
use super::event::{Event, EventMask, WatchHandle};
use super::registry::{RemovalListener, WatchRegistry};
use crate::notify::Notifier;
use nix::errno::Errno;
use std::ffi::{CString, OsStr, OsString};
use std::fmt::{Debug, Formatter};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{trace, warn};

/// Fixed part of one raw record: wd, mask, cookie, len.
const EVENT_HEADER_LEN: usize = std::mem::size_of::<libc::inotify_event>();

/// Longest child name the kernel appends to a record.
const NAME_MAX: usize = 255;

/// The kernel fails a read with EINVAL when the buffer cannot hold one
/// maximal record, so this must stay >= `EVENT_HEADER_LEN + NAME_MAX + 1`.
const BUFFER_LEN: usize = 4096;

const _: () = assert!(BUFFER_LEN >= EVENT_HEADER_LEN + NAME_MAX + 1);

/// Owned inotify instance plus the registry of everything it watches.
///
/// The descriptor is close-on-exec and closed on every exit path, which is
/// also how the kernel drops all remaining watches.
pub struct Inotify {
    fd: OwnedFd,
    registry: WatchRegistry,
    notifier: Arc<dyn Notifier>,
    buffer: [u8; BUFFER_LEN],
    buffer_next_event_idx: usize,
    buffer_filled_to_idx: usize,
}

impl Debug for Inotify {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inotify")
            .field("fd", &self.fd)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Inotify {
    /// Open a fresh inotify instance watching nothing.
    pub fn open(notifier: Arc<dyn Notifier>) -> Result<Self> {
        // SAFETY: no pointers cross the syscall boundary.
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(WatchError::FailedToCreate { source: Errno::last() });
        }
        // SAFETY: fd was just handed to us by the kernel and nothing else
        // owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            registry: WatchRegistry::default(),
            notifier,
            buffer: [0; BUFFER_LEN],
            buffer_next_event_idx: 0,
            buffer_filled_to_idx: 0,
        })
    }

    /// Register an absolute `path` with the kernel for the events in
    /// `mask`. Watching a path twice yields the original handle and leaves
    /// the registry unchanged.
    pub fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle> {
        debug_assert!(path.is_absolute(), "watch paths must be absolute");
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            WatchError::FailedToAdd {
                path: path.to_path_buf(),
                source: Errno::EINVAL,
            }
        })?;
        // SAFETY: c_path lives past the call and is NUL terminated.
        let wd = unsafe {
            libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask.bits())
        };
        if wd < 0 {
            return Err(WatchError::FailedToAdd {
                path: path.to_path_buf(),
                source: Errno::last(),
            });
        }
        let handle = WatchHandle::from_raw(wd);
        if self.registry.insert(handle, path.to_path_buf()) {
            self.emit_status();
        }
        Ok(handle)
    }

    /// [Inotify::add_watch] for a child of an already watched directory,
    /// named relative to it.
    pub fn add_watch_relative(
        &mut self,
        name: &OsStr,
        parent: WatchHandle,
        mask: EventMask,
    ) -> Result<WatchHandle> {
        let Some(parent_path) = self.registry.path_of(parent) else {
            return Err(WatchError::UnknownParent { parent });
        };
        let path = parent_path.join(name);
        self.add_watch(&path, mask)
    }

    /// Unregister a watch. Listeners fire exactly once with the handle and
    /// the path it was registered under.
    pub fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        let Some(path) = self.registry.path_of(handle).map(Path::to_path_buf) else {
            return Err(WatchError::UnknownWatch { handle });
        };
        // SAFETY: no pointers cross the syscall boundary.
        if unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), handle.as_raw()) } != 0 {
            return Err(WatchError::FailedToRemove {
                path,
                source: Errno::last(),
            });
        }
        let _ = self.registry.purge(handle);
        self.emit_status();
        Ok(())
    }

    /// [Inotify::remove_watch] addressed by path.
    pub fn remove_watch_at(&mut self, path: &Path) -> Result<()> {
        let Some(handle) = self.registry.handle_of(path) else {
            return Err(WatchError::PathNotWatched {
                path: path.to_path_buf(),
            });
        };
        self.remove_watch(handle)
    }

    pub fn add_removal_listener(&mut self, listener: RemovalListener) {
        self.registry.add_removal_listener(listener);
    }

    pub fn path_of(&self, handle: WatchHandle) -> Option<&Path> {
        self.registry.path_of(handle)
    }

    pub fn handle_of(&self, path: &Path) -> Option<WatchHandle> {
        self.registry.handle_of(path)
    }

    pub fn watch_count(&self) -> usize {
        self.registry.len()
    }

    /// Pull the next event, blocking until the kernel delivers one.
    ///
    /// Two kinds of records never reach the caller. Events for descriptors
    /// that are no longer registered are drained silently, because the
    /// kernel keeps queueing for a short while after `inotify_rm_watch`
    /// returns. `IN_IGNORED` purges the registry entry for its watch (the
    /// kernel has already dropped the watch itself) and is then swallowed.
    pub fn read_event(&mut self) -> Result<Event> {
        loop {
            if self.buffer_next_event_idx == self.buffer_filled_to_idx {
                self.buffer_next_event_idx = 0;
                self.buffer_filled_to_idx = 0;
                let n_bytes = nix::unistd::read(self.fd.as_raw_fd(), &mut self.buffer)
                    .map_err(|source| WatchError::ReadFailed { source })?;
                if n_bytes == 0 {
                    return Err(WatchError::UnexpectedEof);
                }
                self.buffer_filled_to_idx = n_bytes;
            }

            let record = RawRecord::decode(
                &self.buffer[self.buffer_next_event_idx..self.buffer_filled_to_idx],
            );
            // Advance by the declared length, not by the decoded name: the
            // kernel NUL pads names up to `len`.
            self.buffer_next_event_idx += EVENT_HEADER_LEN + record.declared_len;

            let Some(path_of_watch) =
                self.registry.path_of(record.watch).map(Path::to_path_buf)
            else {
                warn!("Got event for unknown watch: {record:?}");
                continue;
            };

            let event = Event {
                watch: record.watch,
                mask: record.mask,
                cookie: record.cookie,
                name: record.name,
                path_of_watch,
            };
            trace!("{event}");

            if event.mask.contains(EventMask::IGNORED) {
                trace!(
                    "Removing watch={} ({})",
                    event.watch,
                    event.path_of_watch.display()
                );
                if self.registry.purge(event.watch).is_some() {
                    self.emit_status();
                }
                continue;
            }

            return Ok(event);
        }
    }

    fn emit_status(&self) {
        self.notifier
            .status(&format!("Currently watching {} paths", self.registry.len()));
    }
}

/// One record as the kernel lays it out in the read buffer.
#[derive(Debug)]
struct RawRecord {
    watch: WatchHandle,
    mask: EventMask,
    cookie: u32,
    /// Byte count of the (NUL padded) name field following the header.
    declared_len: usize,
    name: Option<OsString>,
}

impl RawRecord {
    fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= EVENT_HEADER_LEN, "truncated inotify record");
        let watch = WatchHandle::from_raw(i32::from_ne_bytes(header_field(buf, 0)));
        let mask = EventMask::from_bits(u32::from_ne_bytes(header_field(buf, 4)));
        let cookie = u32::from_ne_bytes(header_field(buf, 8));
        let declared_len = u32::from_ne_bytes(header_field(buf, 12)) as usize;

        let name_bytes = &buf[EVENT_HEADER_LEN..EVENT_HEADER_LEN + declared_len];
        let end = name_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(name_bytes.len());
        let name_bytes = &name_bytes[..end];
        let name = if name_bytes.is_empty() {
            None
        } else {
            Some(OsStr::from_bytes(name_bytes).to_os_string())
        };

        Self {
            watch,
            mask,
            cookie,
            declared_len,
            name,
        }
    }
}

fn header_field(buf: &[u8], at: usize) -> [u8; 4] {
    buf[at..at + 4].try_into().expect("4 byte header field")
}
