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

use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::ops::BitOr;
use std::path::PathBuf;

/// Watch descriptor handed out by the kernel for one registered path.
///
/// Unique within a single inotify instance and stable for the lifetime of
/// the watch; the kernel reuses the integer only after the watch has been
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub(crate) const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub(crate) const fn as_raw(self) -> i32 {
        self.0
    }
}

impl Display for WatchHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bit set of inotify event flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const MODIFY: EventMask = EventMask(libc::IN_MODIFY);
    pub const CREATE: EventMask = EventMask(libc::IN_CREATE);
    pub const DELETE: EventMask = EventMask(libc::IN_DELETE);
    pub const DELETE_SELF: EventMask = EventMask(libc::IN_DELETE_SELF);
    pub const MOVED_FROM: EventMask = EventMask(libc::IN_MOVED_FROM);
    pub const MOVED_TO: EventMask = EventMask(libc::IN_MOVED_TO);
    pub const MOVE_SELF: EventMask = EventMask(libc::IN_MOVE_SELF);
    pub const ISDIR: EventMask = EventMask(libc::IN_ISDIR);
    pub const IGNORED: EventMask = EventMask(libc::IN_IGNORED);

    pub(crate) const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub(crate) const fn bits(self) -> u32 {
        self.0
    }

    /// Set union, usable in const context.
    pub const fn union(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        self.union(rhs)
    }
}

/// Flags worth a name in logs, same spelling the kernel headers use.
const FLAG_NAMES: &[(u32, &str)] = &[
    (libc::IN_ACCESS, "IN_ACCESS"),
    (libc::IN_ATTRIB, "IN_ATTRIB"),
    (libc::IN_CLOSE_WRITE, "IN_CLOSE_WRITE"),
    (libc::IN_CLOSE_NOWRITE, "IN_CLOSE_NOWRITE"),
    (libc::IN_CREATE, "IN_CREATE"),
    (libc::IN_DELETE, "IN_DELETE"),
    (libc::IN_DELETE_SELF, "IN_DELETE_SELF"),
    (libc::IN_MODIFY, "IN_MODIFY"),
    (libc::IN_MOVE_SELF, "IN_MOVE_SELF"),
    (libc::IN_MOVED_FROM, "IN_MOVED_FROM"),
    (libc::IN_MOVED_TO, "IN_MOVED_TO"),
    (libc::IN_OPEN, "IN_OPEN"),
    (libc::IN_IGNORED, "IN_IGNORED"),
    (libc::IN_ISDIR, "IN_ISDIR"),
    (libc::IN_Q_OVERFLOW, "IN_Q_OVERFLOW"),
    (libc::IN_UNMOUNT, "IN_UNMOUNT"),
];

impl Display for EventMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        let mut remaining = self.0;
        let mut anything = false;
        for (bits, name) in FLAG_NAMES {
            if remaining & *bits == *bits {
                if anything {
                    write!(f, ", ")?;
                }
                write!(f, "{name}")?;
                remaining &= !*bits;
                anything = true;
            }
        }
        if remaining != 0 {
            if anything {
                write!(f, ", ")?;
            }
            write!(f, "{remaining:#x}")?;
        }
        write!(f, "]")
    }
}

/// One decoded kernel record, enriched with the absolute path of the watch
/// that produced it.
#[derive(Debug, Clone)]
pub struct Event {
    pub watch: WatchHandle,
    pub mask: EventMask,
    /// Correlates the two halves of a rename.
    pub cookie: u32,
    /// Name of the child the event is about, relative to the watched
    /// directory. Absent for events about the watched path itself.
    pub name: Option<OsString>,
    pub path_of_watch: PathBuf,
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{watch={}, mask={}, cookie={}, name={}, path_of_watch={}}}",
            self.watch,
            self.mask,
            self.cookie,
            self.name.as_deref().unwrap_or(OsStr::new("")).to_string_lossy(),
            self.path_of_watch.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_contains_all_bits() {
        let mask = EventMask::CREATE | EventMask::ISDIR;
        assert!(mask.contains(EventMask::CREATE));
        assert!(mask.contains(EventMask::ISDIR));
        assert!(mask.contains(EventMask::CREATE | EventMask::ISDIR));
        assert!(!mask.contains(EventMask::DELETE));
        assert!(!mask.contains(EventMask::CREATE | EventMask::DELETE));
    }

    #[test]
    fn test_mask_display_names_known_flags() {
        let mask = EventMask::CREATE | EventMask::ISDIR;
        assert_eq!(mask.to_string(), "[IN_CREATE, IN_ISDIR]");
    }

    #[test]
    fn test_mask_display_keeps_unknown_bits() {
        let mask = EventMask::from_bits(libc::IN_MODIFY | 0x1000_0000);
        assert_eq!(mask.to_string(), "[IN_MODIFY, 0x10000000]");
    }
}
