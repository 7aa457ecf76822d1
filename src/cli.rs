use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Church administration CLI.
/// Storage defaults to ~/.chm or a directory passed via --data.
#[derive(Parser)]
#[command(name = "chm", version, about = "Church, member and activity administration")]
pub struct Cli {
    /// Directory holding the data file, settings, assets and log.
    #[arg(long, global = true, env = "CHM_DATA")]
    pub data: Option<PathBuf>,

    /// Act as this user (email) instead of the one in settings.
    #[arg(long, global = true)]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
