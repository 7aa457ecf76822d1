//! TUI entry points and terminal setup.

use std::{io, path::Path};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::CrosstermBackend, Terminal};

use crate::db::Database;
use crate::session::ContextIds;
use crate::settings::Settings;
use crate::tui::app::App;
use crate::tui::menu::ContextMenu;

type Term = Terminal<CrosstermBackend<io::Stdout>>;

fn enter() -> io::Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn leave(terminal: &mut Term) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()
}

/// Initialise and run the main terminal user interface.
pub fn run_tui(data_dir: &Path, db: Database, settings: Settings) -> io::Result<()> {
    let mut terminal = enter()?;
    let mut app = App::new(data_dir, db, settings);
    let result = app.run(&mut terminal);
    leave(&mut terminal)?;
    result
}

/// Run the church/branch picker on its own. Returns `None` when cancelled.
pub fn run_context_menu(db: &Database, current: ContextIds) -> io::Result<Option<ContextIds>> {
    let mut terminal = enter()?;
    let mut menu = ContextMenu::new(db, current);
    let result = menu.run(&mut terminal, db);
    leave(&mut terminal)?;
    result
}
