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

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const DEFAULT_SLICE: &str = "/user.slice/";
pub const DEFAULT_WINDOW_SECONDS: f64 = 10.0;
pub const DEFAULT_EVENT_THRESHOLD: u32 = 50;

/// The root user's own session slice; killing it would take the machine's
/// recovery path down with the bomb.
const DEFAULT_EXCLUDE: &str = "user.slice/user-0.slice";

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cgroup root '{path}' is not a directory")]
    CgroupRootNotADirectory { path: PathBuf },
    #[error("window length must be a positive number of seconds (got {value})")]
    InvalidWindowSeconds { value: f64 },
    #[error("exclude '{path}' is not an absolute path")]
    ExcludeNotAbsolute { path: PathBuf },
}

/// Daemon configuration as assembled by the caller, not yet checked
/// against the running system.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path where the cgroup2 filesystem is mounted.
    pub cgroup_root: PathBuf,
    /// Slice below the mount in which all cgroups are indexed.
    pub slice: String,
    /// Window length in seconds for counting failed forks.
    pub window_seconds: f64,
    /// Failed forks per window before the cgroup is killed.
    pub event_threshold: u32,
    /// Subtrees that must never be watched.
    pub excludes: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let cgroup_root = PathBuf::from(DEFAULT_CGROUP_ROOT);
        let excludes = default_excludes(&cgroup_root);
        Self {
            cgroup_root,
            slice: DEFAULT_SLICE.into(),
            window_seconds: DEFAULT_WINDOW_SECONDS,
            event_threshold: DEFAULT_EVENT_THRESHOLD,
            excludes,
        }
    }
}

/// Excludes to use when the caller names none.
pub fn default_excludes(cgroup_root: &Path) -> Vec<PathBuf> {
    vec![cgroup_root.join(DEFAULT_EXCLUDE)]
}

impl Config {
    /// Check the configuration; only a [ValidatedConfig] reaches the core.
    pub fn validate(self) -> Result<ValidatedConfig> {
        if !self.cgroup_root.is_dir() {
            return Err(ConfigError::CgroupRootNotADirectory {
                path: self.cgroup_root,
            });
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ConfigError::InvalidWindowSeconds {
                value: self.window_seconds,
            });
        }
        if let Some(exclude) = self.excludes.iter().find(|path| !path.is_absolute()) {
            return Err(ConfigError::ExcludeNotAbsolute {
                path: exclude.clone(),
            });
        }
        Ok(ValidatedConfig {
            cgroup_root: self.cgroup_root,
            slice: self.slice,
            window_seconds: self.window_seconds,
            event_threshold: self.event_threshold,
            excludes: self.excludes,
        })
    }
}

/// A [Config] that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub cgroup_root: PathBuf,
    pub slice: String,
    pub window_seconds: f64,
    pub event_threshold: u32,
    pub excludes: Vec<PathBuf>,
}

impl ValidatedConfig {
    /// Absolute root of the monitored subtree.
    pub fn monitored_root(&self) -> PathBuf {
        self.cgroup_root.join(self.slice.trim_matches('/'))
    }
}
