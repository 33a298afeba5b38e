//! CLI argument parsing for the vismatch binary.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Visual product matcher
///
/// Builds an embedding index from catalog images and matches query images
/// against it.
#[derive(Parser, Debug)]
#[command(name = "vismatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/vismatch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the index directory
    #[arg(long, global = true)]
    pub index_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract catalog image vectors and publish a new index
    Build {
        /// Catalog manifest (JSON array of {"id", "image"})
        #[arg(short, long)]
        manifest: Option<String>,

        /// Root for relative image paths in the manifest
        #[arg(long)]
        media_root: Option<String>,

        /// Items between progress log lines
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Never download model weights
        #[arg(long)]
        offline: bool,
    },

    /// Match one image against the index
    Match {
        /// Query image (PNG, JPEG or WebP)
        image: String,

        /// Similarity a match must reach (inclusive)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Never download model weights
        #[arg(long)]
        offline: bool,
    },

    /// Show index and model cache status
    Status,
}
