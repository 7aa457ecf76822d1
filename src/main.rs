//! # chm - Church Administration CLI
//!
//! A terminal-native administration tool for denominations, churches, branches,
//! members, visitors and activities, with an optional terminal user interface (TUI).
//!
//! ## Key Features
//!
//! - **Guarded Fields**: Membership status and ministerial function changes on an
//!   existing member are held until confirmed, and every change is recorded in the
//!   member's timeline
//! - **Validated Forms**: Field rules, cross-field rules and uniqueness checks shared
//!   by the CLI and the TUI
//! - **Church Management List**: Debounced search, filters, sorting, paging, multi-select
//!   and bulk actions (activate, deactivate, delete, CSV export)
//! - **Active Context**: The selected church and branch scope the member list and
//!   new records, and survive restarts
//! - **Local File Storage**: One JSON data file plus settings, assets and log under
//!   the data directory
//!
//! ## Quick Start
//!
//! ```bash
//! # Register a church and make it active
//! chm churches add "Igreja Betel" --email contato@betel.org --city Recife --state PE
//! chm select
//!
//! # Add a member to the active church
//! chm members add "Ana Souza" --email ana@betel.org --phone 81999990000
//!
//! # Move a member to another status (asks for --yes)
//! chm members status 1 transferred --reason "Moved to Natal" --yes
//!
//! # Launch the TUI
//! chm ui
//! ```
//!
//! Data lives in `~/.chm/` unless `--data` or `CHM_DATA` points elsewhere. Set
//! `CHM_LOG=debug` for verbose logs in `<data>/chm.log`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub mod activity;
pub mod church;
pub mod cli;
pub mod cmd;
pub mod db;
pub mod error;
pub mod fields;
pub mod forms;
pub mod member;
pub mod postal;
pub mod service;
pub mod session;
pub mod settings;
pub mod views {
    pub mod debounce;
    pub mod detail;
    pub mod list;
    pub mod timeline;
}
pub mod tui {
    pub mod app;
    pub mod colors;
    pub mod enums;
    pub mod input;
    pub mod menu;
    pub mod run;
    pub mod utils;
}

use cli::Cli;
use cmd::*;
use db::Database;
use settings::{default_data_dir, Settings, DATA_FILE, LOG_FILE};

/// Send tracing output to the log file; the TUI owns the terminal.
fn init_logging(data_dir: &Path) {
    let Ok(file) = OpenOptions::new().create(true).append(true).open(data_dir.join(LOG_FILE)) else {
        return;
    };
    let filter = EnvFilter::try_from_env("CHM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return;
    }

    let data_dir = cli.data.clone().unwrap_or_else(default_data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Failed to create data directory {}: {}", data_dir.display(), e);
        std::process::exit(1);
    }
    init_logging(&data_dir);

    let mut settings = Settings::load(&data_dir);
    let mut db = Database::load(&data_dir.join(DATA_FILE));
    if let Some(email) = cli.actor.as_deref() {
        settings.actor = actor_for_email(&db, email, &settings.actor);
    }

    match cli.command {
        Commands::Ui => cmd_ui(&data_dir, db, settings),
        Commands::Select => cmd_select(&data_dir, &db, &mut settings),
        Commands::Churches { action } => cmd_churches(&mut db, &data_dir, &settings, action),
        Commands::Branches { action } => cmd_branches(&mut db, &settings, action),
        Commands::Members { action } => cmd_members(&mut db, &data_dir, &settings, action),
        Commands::Visitors { action } => cmd_visitors(&mut db, &settings, action),
        Commands::Activities { action } => cmd_activities(&mut db, &settings, action),
        Commands::Denominations { action } => cmd_denominations(&mut db, action),
        Commands::Hierarchy => cmd_hierarchy(&db),
        Commands::Completions { .. } => unreachable!("completions handled above"),
    }
}
