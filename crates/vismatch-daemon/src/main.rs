//! vismatch
//!
//! Visual product matcher: finds the catalog item whose image is most similar
//! to a query image.
//!
//! # Usage
//!
//! ```bash
//! vismatch build [--manifest PATH] [--media-root DIR] [--offline]
//! vismatch match IMAGE [--threshold 0.7]
//! vismatch status
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vismatch/config.toml)
//! 3. Environment variables (VISMATCH_*)
//! 4. CLI flags

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use vismatch_daemon::commands::exit;
use vismatch_daemon::{
    exit_code, init_logging, load_settings, print_build_report, print_status, resnet_loader,
    run_build, run_match, run_status, Cli, Commands, Overrides,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut overrides = Overrides {
        log_level: cli.log_level,
        index_dir: cli.index_dir,
        ..Default::default()
    };

    match cli.command {
        Commands::Build {
            manifest,
            media_root,
            batch_size,
            offline,
        } => {
            overrides.manifest = manifest;
            overrides.media_root = media_root;
            let settings = load_settings(cli.config.as_deref(), &overrides)?;
            init_logging(&settings)?;

            let report = run_build(&settings, resnet_loader(&settings, offline), batch_size).await?;
            print_build_report(&report);
            println!("Index published to {}", settings.index_path().display());
        }
        Commands::Match {
            image,
            threshold,
            offline,
        } => {
            overrides.threshold = threshold;
            let settings = load_settings(cli.config.as_deref(), &overrides)?;
            init_logging(&settings)?;

            let output =
                run_match(&settings, resnet_loader(&settings, offline), Path::new(&image)).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to encode result")?
            );
        }
        Commands::Status => {
            let settings = load_settings(cli.config.as_deref(), &overrides)?;
            init_logging(&settings)?;
            print_status(&run_status(&settings));
        }
    }

    Ok(exit::OK)
}
