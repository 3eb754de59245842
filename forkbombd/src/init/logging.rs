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

use log::{Level, LevelFilter, SetLoggerError};
use simplelog::SimpleLogger;
use std::str::FromStr;
use syslog::{BasicLogger, Facility, Formatter3164};

const FORKBOMBD_SYSLOG_NAME: &str = "forkbombd";

/// Environment variable overriding the log level
/// (`trace|debug|info|warn|error|off`).
const LOGGER_ENV: &str = "LOGGER";

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("Unable to install log sinks: {0}")]
    InstallFailure(SetLoggerError),
    #[error("Unable to setup syslog: {0}")]
    SysLogSetupFailure(SetLoggerError),
}

/// Resolve the level to log at: the `LOGGER` environment variable wins
/// over the verbosity flag.
pub fn logger_level(verbose: bool) -> LevelFilter {
    if let Ok(value) = std::env::var(LOGGER_ENV) {
        if let Ok(filter) = LevelFilter::from_str(value.trim()) {
            return filter;
        }
        eprintln!("Unknown log level \"{value}\", using the default");
    }
    if verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    }
}

/// Install the process-wide log sinks.
///
/// Under systemd a syslog sink is added next to the terminal logger so the
/// journal picks messages up; everywhere else the terminal logger is
/// enough. `tracing` macros land here through the crate's `log` bridge.
pub fn init(filter: LevelFilter) -> Result<(), LoggingError> {
    let Some(logger_level) = filter.to_level() else {
        // LOGGER=off
        return Ok(());
    };
    if std::env::var_os("SYSTEMD_EXEC_PID").is_some() {
        init_syslog_logging(logger_level)
    } else {
        init_simple_logging(logger_level)
    }
}

fn init_syslog_logging(logger_level: Level) -> Result<(), LoggingError> {
    // Syslog formatter
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: FORKBOMBD_SYSLOG_NAME.into(),
        pid: 0,
    };

    let logger_simple = create_logger_simple(logger_level);

    let logger_syslog = match syslog::unix(formatter) {
        Ok(log_val) => log_val,
        Err(e) => {
            panic!("Unable to setup syslog: {:?}", e);
        }
    };

    multi_log::MultiLogger::init(
        vec![logger_simple, Box::new(BasicLogger::new(logger_syslog))],
        logger_level,
    )
    .map_err(LoggingError::SysLogSetupFailure)
}

fn init_simple_logging(logger_level: Level) -> Result<(), LoggingError> {
    multi_log::MultiLogger::init(
        vec![create_logger_simple(logger_level)],
        logger_level,
    )
    .map_err(LoggingError::InstallFailure)
}

fn create_logger_simple(logger_level: Level) -> Box<SimpleLogger> {
    SimpleLogger::new(
        logger_level.to_level_filter(),
        simplelog::Config::default(),
    )
}
