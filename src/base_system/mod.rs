//! Infrastructure shared by every subcommand: layered configuration,
//! resolved settings, logging bootstrap and path checks.

pub mod config;
pub mod context;
pub mod logging;
pub mod path;
