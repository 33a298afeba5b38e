//! vismatch binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (build, match, status)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    exit_code, index_files, init_logging, load_settings, print_build_report, print_status,
    resnet_loader, run_build, run_match, run_status, MatchOutput, Overrides, StatusReport,
};
