//! Church and branch picker for the active context.
//!
//! Used as a screen inside the main TUI and on its own by `chm select`.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use tracing::warn;

use crate::church::{Branch, Church};
use crate::db::format_church_status;
use crate::service::{ChurchQuery, ChurchService};
use crate::session::ContextIds;
use crate::tui::colors::DARK_GREEN;

#[derive(Debug, Clone, Copy, PartialEq)]
enum MenuState {
    Churches,
    Branches,
}

/// Result of a finished picker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuOutcome {
    Selected(ContextIds),
    Cancelled,
}

pub struct ContextMenu {
    state: MenuState,
    list_state: ListState,
    churches: Vec<Church>,
    branches: Vec<Branch>,
    chosen: Option<u64>,
    status_message: String,
    outcome: Option<MenuOutcome>,
}

impl ContextMenu {
    pub fn new(churches: &dyn ChurchService, current: ContextIds) -> Self {
        let query = ChurchQuery { page_size: 500, ..ChurchQuery::default() };
        let (list, status_message) = match churches.list_churches(&query) {
            Ok(page) => (page.results, String::new()),
            Err(e) => {
                warn!(error = %e, "church list unavailable for picker");
                (Vec::new(), e.user_message())
            }
        };
        let mut list_state = ListState::default();
        let preselect = current.church_id.and_then(|id| list.iter().position(|c| c.id == id)).unwrap_or(0);
        list_state.select(if list.is_empty() { None } else { Some(preselect) });
        ContextMenu {
            state: MenuState::Churches,
            list_state,
            churches: list,
            branches: Vec::new(),
            chosen: None,
            status_message,
            outcome: None,
        }
    }

    fn len(&self) -> usize {
        match self.state {
            MenuState::Churches => self.churches.len(),
            // first row is "whole church"
            MenuState::Branches => self.branches.len() + 1,
        }
    }

    fn step(&mut self, down: bool) {
        let len = self.len();
        if len == 0 {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0);
        self.list_state.select(Some(crate::forms::cycle(current, len, down)));
    }

    /// Feed one key. Returns the outcome once the user has decided.
    pub fn handle_key(&mut self, key: KeyCode, churches: &dyn ChurchService) -> Option<MenuOutcome> {
        self.status_message.clear();
        match (self.state, key) {
            (_, KeyCode::Up) | (_, KeyCode::Char('k')) => self.step(false),
            (_, KeyCode::Down) | (_, KeyCode::Char('j')) => self.step(true),
            (MenuState::Churches, KeyCode::Esc) | (MenuState::Churches, KeyCode::Char('q')) => {
                self.outcome = Some(MenuOutcome::Cancelled);
            }
            (MenuState::Churches, KeyCode::Char('n')) => {
                self.outcome = Some(MenuOutcome::Selected(ContextIds::default()));
            }
            (MenuState::Churches, KeyCode::Enter) => {
                let Some(church) = self.list_state.selected().and_then(|i| self.churches.get(i)) else {
                    return None;
                };
                let church_id = church.id;
                match churches.list_branches(church_id) {
                    Ok(branches) if !branches.is_empty() => {
                        self.branches = branches;
                        self.chosen = Some(church_id);
                        self.state = MenuState::Branches;
                        self.list_state.select(Some(0));
                    }
                    Ok(_) => {
                        self.outcome = Some(MenuOutcome::Selected(ContextIds { church_id: Some(church_id), branch_id: None }));
                    }
                    Err(e) => {
                        warn!(church_id, error = %e, "branches unavailable for picker");
                        self.outcome = Some(MenuOutcome::Selected(ContextIds { church_id: Some(church_id), branch_id: None }));
                    }
                }
            }
            (MenuState::Branches, KeyCode::Esc) => {
                self.state = MenuState::Churches;
                let pos = self.chosen.and_then(|id| self.churches.iter().position(|c| c.id == id)).unwrap_or(0);
                self.list_state.select(Some(pos));
            }
            (MenuState::Branches, KeyCode::Enter) => {
                let idx = self.list_state.selected().unwrap_or(0);
                let branch_id = idx.checked_sub(1).and_then(|i| self.branches.get(i)).map(|b| b.id);
                self.outcome = Some(MenuOutcome::Selected(ContextIds { church_id: self.chosen, branch_id }));
            }
            _ => {}
        }
        self.outcome
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .split(area);

        let title = match self.state {
            MenuState::Churches => "SELECT CHURCH".to_string(),
            MenuState::Branches => {
                let name = self
                    .chosen
                    .and_then(|id| self.churches.iter().find(|c| c.id == id))
                    .map(|c| c.name.as_str())
                    .unwrap_or("");
                format!("SELECT BRANCH OF {}", name.to_uppercase())
            }
        };
        let header = Paragraph::new(Line::from(Span::styled(title, Style::default().add_modifier(Modifier::BOLD))))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(header, chunks[0]);

        let items: Vec<ListItem> = match self.state {
            MenuState::Churches => self
                .churches
                .iter()
                .map(|c| {
                    ListItem::new(Line::from(format!(
                        "  {:<40} {:<20} {:<3} {}",
                        c.name,
                        c.address.city,
                        c.address.state,
                        format_church_status(c.status)
                    )))
                })
                .collect(),
            MenuState::Branches => std::iter::once(ListItem::new(Line::from("  Whole church (all branches)")))
                .chain(self.branches.iter().map(|b| {
                    let marker = if b.is_active { "" } else { " (inactive)" };
                    ListItem::new(Line::from(format!("  {}{}", b.name, marker)))
                }))
                .collect(),
        };
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL))
            .highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
            .highlight_symbol("► ");
        f.render_stateful_widget(list, chunks[1], &mut self.list_state);

        let hint = if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            match self.state {
                MenuState::Churches => "↑↓ navigate, Enter select, n clear selection, Esc cancel".to_string(),
                MenuState::Branches => "↑↓ navigate, Enter select, Esc back to churches".to_string(),
            }
        };
        f.render_widget(Paragraph::new(hint).style(Style::default().bg(DARK_GREEN).fg(Color::White)), chunks[2]);
    }

    /// Standalone event loop.
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>, churches: &dyn ChurchService) -> io::Result<Option<ContextIds>> {
        loop {
            terminal.draw(|f| {
                let area = f.area();
                self.render(f, area)
            })?;
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match self.handle_key(key.code, churches) {
                        Some(MenuOutcome::Selected(ids)) => return Ok(Some(ids)),
                        Some(MenuOutcome::Cancelled) => return Ok(None),
                        None => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::church::Address;
    use crate::db::tests::church_payload;
    use crate::db::Database;

    #[test]
    fn test_pick_church_then_branch() {
        let mut db = Database::in_memory();
        let betel = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let zion = db.create_church(church_payload("Zion", "z@x.org")).unwrap();
        let centro = db.create_branch(zion.id, "Centro", Address::default()).unwrap();

        let mut menu = ContextMenu::new(&db, ContextIds::default());
        assert_eq!(menu.handle_key(KeyCode::Enter, &db), Some(MenuOutcome::Selected(ContextIds { church_id: Some(betel.id), branch_id: None })));

        let mut menu = ContextMenu::new(&db, ContextIds { church_id: Some(zion.id), branch_id: None });
        assert_eq!(menu.handle_key(KeyCode::Enter, &db), None);
        menu.handle_key(KeyCode::Down, &db);
        assert_eq!(
            menu.handle_key(KeyCode::Enter, &db),
            Some(MenuOutcome::Selected(ContextIds { church_id: Some(zion.id), branch_id: Some(centro.id) }))
        );
    }

    #[test]
    fn test_escape_steps_back_then_cancels() {
        let mut db = Database::in_memory();
        let zion = db.create_church(church_payload("Zion", "z@x.org")).unwrap();
        db.create_branch(zion.id, "Centro", Address::default()).unwrap();
        let mut menu = ContextMenu::new(&db, ContextIds::default());
        menu.handle_key(KeyCode::Enter, &db);
        assert_eq!(menu.handle_key(KeyCode::Esc, &db), None);
        assert_eq!(menu.handle_key(KeyCode::Esc, &db), Some(MenuOutcome::Cancelled));
    }
}
