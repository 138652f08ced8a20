//! Command-line interface for glasswave.
//!
//! This module is the composition root: it builds the loader, engine,
//! controller and device registry from config and runs them on a tokio
//! runtime.

mod commands;

pub use commands::{Cli, Commands, run_command};
