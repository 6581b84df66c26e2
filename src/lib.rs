//! Host monitoring daemon for Unix services.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
use strum as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Wall-clock stamps and uptime rendering.
pub mod clock;

/// Command execution with bounded wait.
pub mod command;

/// Control file loading.
pub mod config;

/// Dependency-aware service actions.
pub mod control;

/// Cron-expression matching.
pub mod cron;

/// Daemon loop and signals.
pub mod daemon;

/// Errors.
pub mod error;

/// Service events.
pub mod event;

/// Pid file, id file and hashing.
pub mod files;

/// Heartbeat to remote collectors.
pub mod heartbeat;

/// Loopback HTTP control surface.
pub mod http;

/// Process liveness and convergence.
pub mod observe;

/// Status reporting.
pub mod report;

/// Engine context.
pub mod run;

/// Type-specific samplers.
pub mod sample;

/// Service catalogue.
pub mod service;

/// Persisted monitoring state.
pub mod state;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;

/// One monitoring cycle.
pub mod validate;
