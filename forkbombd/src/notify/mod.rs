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

//! Hooks into whatever service supervisor launched the daemon.

use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Readiness and liveness reporting towards a service supervisor.
///
/// [Notifier::ready] fires once after the initial tree population,
/// [Notifier::status] whenever the number of live watches changes. The
/// provided [Notifier::errno] lets a fatal error surface its errno to the
/// supervisor; implementations without a use for it can leave the default.
pub trait Notifier {
    /// Initial population is done, the daemon is serving events.
    fn ready(&self);

    /// Short human-readable state line.
    fn status(&self, status: &str);

    /// Errno of the error taking the daemon down.
    fn errno(&self, errno: i32) {
        let _ = errno;
    }
}

/// Notifier for daemons running outside any supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn ready(&self) {}

    fn status(&self, _status: &str) {}
}

/// Speaks the notify protocol over the datagram socket systemd hands to
/// `Type=notify` services.
#[derive(Debug)]
pub struct SystemdNotifier {
    socket_path: String,
}

impl SystemdNotifier {
    /// Returns `None` when not launched with a usable notify socket.
    pub fn from_environment() -> Option<Self> {
        let socket_path = std::env::var(NOTIFY_SOCKET_ENV).ok()?;
        if !valid_socket_path(&socket_path) {
            debug!("Ignoring unusable {NOTIFY_SOCKET_ENV} '{socket_path}'");
            return None;
        }
        Some(Self { socket_path })
    }

    #[cfg(test)]
    fn at(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Best-effort send; a supervisor that went away must not take the
    /// daemon with it.
    fn notify(&self, state: &str) {
        // An abstract socket address is spelled with a leading NUL.
        let target = self
            .socket_path
            .strip_prefix('@')
            .map_or_else(|| self.socket_path.clone(), |suffix| format!("\0{suffix}"));

        let socket = match UnixDatagram::unbound() {
            Ok(socket) => socket,
            Err(e) => {
                debug!("Could not create notify socket: {e}");
                return;
            }
        };
        match socket.send_to(state.as_bytes(), Path::new(&target)) {
            Ok(_) => trace!("Notified supervisor: {state}"),
            Err(e) => debug!("Could not notify '{}': {e}", self.socket_path),
        }
    }
}

/// The socket must be an absolute path or an abstract address.
fn valid_socket_path(socket_path: &str) -> bool {
    socket_path.starts_with('/') || socket_path.starts_with('@')
}

impl Notifier for SystemdNotifier {
    fn ready(&self) {
        self.notify("READY=1");
    }

    fn status(&self, status: &str) {
        self.notify(&format!("STATUS={status}"));
    }

    fn errno(&self, errno: i32) {
        self.notify(&format!("ERRNO={errno}"));
    }
}

/// Pick the notifier matching the launch environment.
pub fn from_environment() -> Arc<dyn Notifier> {
    match SystemdNotifier::from_environment() {
        Some(notifier) => Arc::new(notifier),
        None => Arc::new(NoopNotifier),
    }
}
