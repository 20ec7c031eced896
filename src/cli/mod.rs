use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoupdaterctl", version, about = "Trigger and inspect package updates on the controlled host")]
pub struct Cli {
    /// Path to the controller config file
    #[arg(short, long, default_value = "autoupdater.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring a package to its latest tagged release
    Update {
        /// Package name, as derived from its local repo path basename
        name: String,
    },

    /// Bring every registered package to its latest tagged release, in order
    UpdateAll,

    /// Compare a package's current version to the latest available tag
    Check {
        /// Package name
        name: String,
    },

    /// List every package known to the registry
    Packages,

    /// List backups recorded for a package
    Backups {
        /// Package name
        name: String,
    },

    /// Show a package's current per-service compose status
    Status {
        /// Package name
        name: String,
    },
}
