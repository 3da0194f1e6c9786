use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// squashrepo - install Arch packages from SquashFS repository images
#[derive(Parser, Debug)]
#[command(name = "squashrepo")]
#[command(about = "Download a SquashFS repository image, mount it and install its packages")]
#[command(version)]
pub struct Cli {
    /// Load settings from a JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the downloaded image and its mount point
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    /// Run privileged commands directly instead of through sudo
    #[arg(long, global = true)]
    pub no_sudo: bool,

    /// Dry-run mode: log every external command instead of running it.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Skip the pre-flight tool and privilege checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Fetch the catalog and choose a repository image interactively
    Browse,
    /// Download, mount and install one repository image
    Install {
        /// Download link of the image (Google Drive sharing links are accepted)
        link: String,
    },
    /// Show which packages a directory would install, after deduplication
    Plan {
        /// Directory to scan, e.g. an already mounted image
        dir: PathBuf,
    },
    /// Print the parsed repository catalog
    Catalog {
        /// Parse this file instead of cloning the catalog repository
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write a config file with default values
    Init {
        path: PathBuf,
    },
    /// Validate a config file
    Validate {
        path: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
