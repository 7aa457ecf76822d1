//! Main application logic for the terminal user interface.
//!
//! This module contains the `App` struct which owns the screen state, feeds
//! keystrokes to the list views and forms, renders every screen and keeps the
//! active church/branch in sync with the member list and the settings file.

use std::cell::Cell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell as TableCell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Tabs, Wrap},
    Frame, Terminal,
};
use tracing::{info, warn};

use crate::church::Address;
use crate::db::*;
use crate::fields::*;
use crate::forms::activity_form::ActivityForm;
use crate::forms::church_form::{ChurchField, ChurchForm};
use crate::forms::member_form::{GuardKind, MemberField, MemberForm, MemberTab, FUNCTIONS, STATUSES};
use crate::forms::validate::non_empty;
use crate::postal::PostalDirectory;
use crate::service::{ChurchService, MemberService};
use crate::session::ActiveContext;
use crate::settings::{Settings, POSTAL_FILE};
use crate::tui::{
    colors::{severity_color, DARK_GREEN, DARK_RED, GOLD},
    enums::{AppState, InputMode, PendingAction},
    input::InputField,
    menu::{ContextMenu, MenuOutcome},
    utils::centered_rect,
};
use crate::views::detail::{ChurchDetail, DetailTab, TabData, TabState};
use crate::views::list::{ChurchList, LoadPhase, MemberList};
use crate::views::timeline::{MemberTimeline, TimelineKind};

const PAGE_SIZES: [usize; 4] = [10, 20, 50, 100];
const SORT_KEYS: [ChurchSortKey; 6] = [
    ChurchSortKey::Name,
    ChurchSortKey::City,
    ChurchSortKey::State,
    ChurchSortKey::Plan,
    ChurchSortKey::Status,
    ChurchSortKey::Created,
];

/// Main application state for the terminal user interface.
pub struct App {
    state: AppState,
    history: Vec<AppState>,
    db: Database,
    postal: PostalDirectory,
    settings: Settings,
    data_dir: PathBuf,
    context: ActiveContext,
    context_changed: Rc<Cell<bool>>,
    churches: ChurchList,
    church_table: TableState,
    detail: Option<ChurchDetail>,
    members: MemberList,
    member_table: TableState,
    church_form: Option<ChurchForm>,
    member_form: Option<MemberForm>,
    activity_form: Option<ActivityForm>,
    timeline: Option<(String, MemberTimeline)>,
    menu: Option<ContextMenu>,
    input_mode: InputMode,
    input_buffer: InputField,
    reason: InputField,
    confirm: Option<PendingAction>,
    status_message: String,
}

impl App {
    pub fn new(data_dir: &Path, db: Database, settings: Settings) -> Self {
        let postal = PostalDirectory::load(&data_dir.join(POSTAL_FILE));
        let mut context = ActiveContext::new(settings.active);
        let context_changed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&context_changed);
        context.subscribe(move |_| flag.set(true));

        let debounce = settings.debounce();
        let ids = settings.active;
        App {
            state: AppState::ChurchList,
            history: Vec::new(),
            churches: ChurchList::new(settings.page_size, debounce),
            members: MemberList::new(settings.page_size, debounce, ids.church_id, ids.branch_id),
            db,
            postal,
            settings,
            data_dir: data_dir.to_path_buf(),
            context,
            context_changed,
            church_table: TableState::default(),
            detail: None,
            member_table: TableState::default(),
            church_form: None,
            member_form: None,
            activity_form: None,
            timeline: None,
            menu: None,
            input_mode: InputMode::None,
            input_buffer: InputField::new(),
            reason: InputField::new(),
            confirm: None,
            status_message: String::new(),
        }
    }

    fn push_state(&mut self, next: AppState) {
        self.history.push(self.state);
        self.state = next;
    }

    fn go_back(&mut self) {
        self.state = self.history.pop().unwrap_or(AppState::ChurchList);
        self.input_mode = InputMode::None;
    }

    /// Screen shown underneath a modal.
    fn underlying_state(&self) -> AppState {
        self.history.last().copied().unwrap_or(AppState::ChurchList)
    }

    fn set_status_message(&mut self, msg: impl Into<String>) {
        self.status_message = msg.into();
    }

    /// Timers and change notifications, once per loop iteration.
    fn tick(&mut self) {
        let now = Instant::now();
        if self.context_changed.replace(false) {
            let ids = self.context.ids();
            self.members.set_scope(ids.church_id, ids.branch_id);
            self.settings.active = ids;
            if let Err(e) = self.settings.save(&self.data_dir) {
                warn!(error = %e, "could not persist active context");
            }
            info!(?ids, "active context changed");
        }
        match self.state {
            AppState::ChurchList => {
                if self.churches.list.tick(now) {
                    self.churches.refresh(&self.db);
                }
                sync_table(&mut self.church_table, self.churches.list.cursor, self.churches.list.rows.len());
            }
            AppState::MemberList => {
                if self.members.list.tick(now) {
                    self.members.refresh(&self.db);
                }
                sync_table(&mut self.member_table, self.members.list.cursor, self.members.list.rows.len());
            }
            _ => {}
        }
    }

    // ---- church list ----

    fn handle_church_list_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> io::Result<bool> {
        let now = Instant::now();
        match self.input_mode {
            InputMode::Search => {
                match key {
                    KeyCode::Char(c) => self.churches.list.push_search_char(c, now),
                    KeyCode::Backspace => self.churches.list.pop_search_char(now),
                    KeyCode::Esc => {
                        self.churches.list.set_search("", now);
                        self.input_mode = InputMode::None;
                    }
                    KeyCode::Enter => self.input_mode = InputMode::None,
                    _ => {}
                }
                return Ok(false);
            }
            InputMode::StateFilter => {
                match key {
                    KeyCode::Char(c) if self.input_buffer.value.chars().count() < 2 => self.input_buffer.handle_char(c),
                    KeyCode::Backspace => self.input_buffer.handle_backspace(),
                    KeyCode::Enter => {
                        let value = non_empty(&self.input_buffer.value);
                        self.churches.set_state_filter(value);
                        self.input_mode = InputMode::None;
                    }
                    KeyCode::Esc => self.input_mode = InputMode::None,
                    _ => {}
                }
                return Ok(false);
            }
            _ => {}
        }

        match key {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return Ok(true),
            KeyCode::Up | KeyCode::Char('k') => self.churches.list.move_cursor(false),
            KeyCode::Down | KeyCode::Char('j') => self.churches.list.move_cursor(true),
            KeyCode::Left => self.churches.list.prev_page(),
            KeyCode::Right => self.churches.list.next_page(),
            KeyCode::Char('/') => self.input_mode = InputMode::Search,
            KeyCode::Char('f') => {
                self.input_buffer.set(self.churches.state.as_deref().unwrap_or(""));
                self.input_mode = InputMode::StateFilter;
            }
            KeyCode::Char('p') => self.churches.cycle_plan_filter(),
            KeyCode::Char('s') => self.churches.cycle_status_filter(),
            KeyCode::Char(c @ '1'..='6') => {
                let idx = c as usize - '1' as usize;
                self.churches.toggle_sort(SORT_KEYS[idx]);
            }
            KeyCode::Char(' ') => self.churches.list.toggle_current(),
            KeyCode::Char('A') => self.churches.list.toggle_select_page(),
            KeyCode::Char('o') => self.run_bulk(BatchAction::Activate),
            KeyCode::Char('i') => self.run_bulk(BatchAction::Deactivate),
            KeyCode::Char('E') => self.run_bulk(BatchAction::Export),
            KeyCode::Char('X') => {
                if self.churches.list.selection_len() == 0 {
                    self.set_status_message("No churches selected");
                } else {
                    self.confirm = Some(PendingAction::Bulk(BatchAction::Delete));
                    self.push_state(AppState::Confirm);
                }
            }
            KeyCode::Char('+') => self.step_page_size(true),
            KeyCode::Char('-') => self.step_page_size(false),
            KeyCode::Enter => {
                if let Some(id) = self.churches.list.current().map(|c| c.id) {
                    self.detail = Some(ChurchDetail::open(id, &self.db));
                    self.push_state(AppState::ChurchDetail);
                }
            }
            KeyCode::Char('a') => {
                self.church_form = Some(ChurchForm::new(&self.db.denominations));
                self.push_state(AppState::ChurchForm);
            }
            KeyCode::Char('e') => {
                if let Some(church) = self.churches.list.current() {
                    self.church_form = Some(ChurchForm::edit(church, &self.db.denominations));
                    self.push_state(AppState::ChurchForm);
                }
            }
            KeyCode::Char('d') => {
                if let Some(id) = self.churches.list.current().map(|c| c.id) {
                    self.confirm = Some(PendingAction::DeleteChurch(id));
                    self.push_state(AppState::Confirm);
                }
            }
            KeyCode::Char('c') => self.open_context_picker(),
            KeyCode::Char('m') => {
                self.members.list.reload();
                self.push_state(AppState::MemberList);
            }
            KeyCode::Char('r') => self.churches.list.reload(),
            KeyCode::Char('h') | KeyCode::F(1) => self.push_state(AppState::Help),
            _ => {}
        }
        Ok(false)
    }

    fn step_page_size(&mut self, up: bool) {
        let pos = PAGE_SIZES.iter().position(|s| *s >= self.churches.list.page_size).unwrap_or(1);
        let next = if up { (pos + 1).min(PAGE_SIZES.len() - 1) } else { pos.saturating_sub(1) };
        self.churches.list.set_page_size(PAGE_SIZES[next]);
        self.set_status_message(format!("{} churches per page", PAGE_SIZES[next]));
    }

    fn run_bulk(&mut self, action: BatchAction) {
        if self.churches.list.selection_len() == 0 {
            self.set_status_message("No churches selected");
            return;
        }
        match self.churches.run_bulk(action, &mut self.db) {
            Ok(report) => {
                let mut msg = format!(
                    "{:?}: {} succeeded, {} failed",
                    action, report.success_count, report.error_count
                );
                if let Some(output) = report.output {
                    msg.push_str(&format!(" ({})", output));
                }
                if let Some(first) = report.errors.first() {
                    msg.push_str(&format!(" - {}", first));
                }
                self.context.invalidate();
                self.set_status_message(msg);
            }
            Err(e) => self.set_status_message(e.user_message()),
        }
    }

    fn open_context_picker(&mut self) {
        self.menu = Some(ContextMenu::new(&self.db, self.context.ids()));
        self.push_state(AppState::ContextPicker);
    }

    // ---- church detail ----

    fn handle_detail_input(&mut self, key: KeyCode, _modifiers: KeyModifiers) -> io::Result<bool> {
        if self.input_mode == InputMode::BranchName {
            match key {
                KeyCode::Char(c) => self.input_buffer.handle_char(c),
                KeyCode::Backspace => self.input_buffer.handle_backspace(),
                KeyCode::Esc => self.input_mode = InputMode::None,
                KeyCode::Enter => {
                    let name = self.input_buffer.trimmed().to_string();
                    if let Some(detail) = self.detail.as_mut() {
                        match detail.create_branch(&name, Address::default(), &mut self.db) {
                            Ok(branch) => {
                                self.status_message = format!("Branch '{}' added", branch.name);
                                self.context.invalidate();
                            }
                            Err(e) => self.status_message = e.user_message(),
                        }
                    }
                    self.input_mode = InputMode::None;
                }
                _ => {}
            }
            return Ok(false);
        }

        let Some(detail) = self.detail.as_mut() else {
            self.go_back();
            return Ok(false);
        };
        match key {
            KeyCode::Esc | KeyCode::Char('q') => {
                self.detail = None;
                self.go_back();
            }
            KeyCode::Tab | KeyCode::Right => detail.step_tab(true, &self.db),
            KeyCode::BackTab | KeyCode::Left => detail.step_tab(false, &self.db),
            KeyCode::Char('r') => detail.refresh_primary(&self.db),
            KeyCode::Char('b') => {
                detail.activate_tab(DetailTab::Branches, &self.db);
                self.input_buffer.set("");
                self.input_mode = InputMode::BranchName;
            }
            KeyCode::Char('e') => {
                if let Some(church) = detail.church.as_ref() {
                    self.church_form = Some(ChurchForm::edit(church, &self.db.denominations));
                    self.push_state(AppState::ChurchForm);
                }
            }
            KeyCode::Char('u') => {
                let id = detail.church_id;
                self.context.select_church(Some(id));
                self.set_status_message("Active church updated");
            }
            KeyCode::Char('n') => {
                let id = detail.church_id;
                match self.db.list_branches(id) {
                    Ok(branches) => {
                        self.activity_form = Some(ActivityForm::new(id, &branches));
                        self.push_state(AppState::ActivityForm);
                    }
                    Err(e) => self.set_status_message(e.user_message()),
                }
            }
            _ => {}
        }
        Ok(false)
    }

    // ---- member list ----

    fn handle_member_list_input(&mut self, key: KeyCode, _modifiers: KeyModifiers) -> io::Result<bool> {
        let now = Instant::now();
        if self.input_mode == InputMode::Search {
            match key {
                KeyCode::Char(c) => self.members.list.push_search_char(c, now),
                KeyCode::Backspace => self.members.list.pop_search_char(now),
                KeyCode::Esc => {
                    self.members.list.set_search("", now);
                    self.input_mode = InputMode::None;
                }
                KeyCode::Enter => self.input_mode = InputMode::None,
                _ => {}
            }
            return Ok(false);
        }

        match key {
            KeyCode::Esc | KeyCode::Char('q') => self.go_back(),
            KeyCode::Up | KeyCode::Char('k') => self.members.list.move_cursor(false),
            KeyCode::Down | KeyCode::Char('j') => self.members.list.move_cursor(true),
            KeyCode::Left => self.members.list.prev_page(),
            KeyCode::Right => self.members.list.next_page(),
            KeyCode::Char('/') => self.input_mode = InputMode::Search,
            KeyCode::Char('s') => self.members.cycle_status_filter(),
            KeyCode::Char('r') => self.members.list.reload(),
            KeyCode::Char('c') => self.open_context_picker(),
            KeyCode::Char('a') => {
                let Some(church_id) = self.context.church_id() else {
                    self.set_status_message("Select a church first (press c)");
                    return Ok(false);
                };
                match self.db.list_branches(church_id) {
                    Ok(branches) => {
                        let mut form = MemberForm::new(church_id, &self.settings.actor, &branches);
                        if let Some(branch_id) = self.context.ids().branch_id {
                            if let Some(pos) = form.branches.iter().position(|(id, _)| *id == Some(branch_id)) {
                                form.branch = pos;
                            }
                        }
                        self.member_form = Some(form);
                        self.push_state(AppState::MemberForm);
                    }
                    Err(e) => self.set_status_message(e.user_message()),
                }
            }
            KeyCode::Enter | KeyCode::Char('e') => {
                if let Some(id) = self.members.list.current().map(|m| m.id) {
                    self.open_member_form(id);
                }
            }
            KeyCode::Char('d') => {
                if let Some(id) = self.members.list.current().map(|m| m.id) {
                    self.confirm = Some(PendingAction::DeleteMember(id));
                    self.push_state(AppState::Confirm);
                }
            }
            KeyCode::Char('H') => {
                if let Some(member) = self.members.list.current() {
                    let timeline = MemberTimeline::load(member.id, &self.db);
                    self.timeline = Some((member.full_name.clone(), timeline));
                    self.push_state(AppState::MemberHistory);
                }
            }
            KeyCode::Char('h') | KeyCode::F(1) => self.push_state(AppState::Help),
            _ => {}
        }
        Ok(false)
    }

    fn open_member_form(&mut self, id: u64) {
        let member = match self.db.get_member(id) {
            Ok(member) => member,
            Err(e) => {
                self.set_status_message(e.user_message());
                return;
            }
        };
        match self.db.list_branches(member.church_id) {
            Ok(branches) => {
                let form = MemberForm::edit(&member, &self.settings.actor, &branches, &self.db);
                if let Some(notice) = form.access_notice() {
                    self.status_message = notice.to_string();
                }
                self.member_form = Some(form);
                self.push_state(AppState::MemberForm);
            }
            Err(e) => self.set_status_message(e.user_message()),
        }
    }

    // ---- member form ----

    fn handle_member_form_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> io::Result<bool> {
        let Some(form) = self.member_form.as_mut() else {
            self.go_back();
            return Ok(false);
        };

        if form.dialog.is_some() {
            match key {
                KeyCode::Char(c) => self.reason.handle_char(c),
                KeyCode::Backspace => self.reason.handle_backspace(),
                KeyCode::Left => self.reason.move_cursor_left(),
                KeyCode::Right => self.reason.move_cursor_right(),
                KeyCode::Enter => {
                    form.confirm_dialog(non_empty(&self.reason.value));
                    self.reason.set("");
                }
                KeyCode::Esc => {
                    form.cancel_dialog();
                    self.reason.set("");
                }
                _ => {}
            }
            return Ok(false);
        }

        match key {
            KeyCode::Char('s') if modifiers.contains(KeyModifiers::CONTROL) => self.submit_member_form(),
            KeyCode::Esc => {
                if form.chooser.is_some() {
                    form.close_chooser();
                } else {
                    self.member_form = None;
                    self.go_back();
                }
            }
            KeyCode::Tab | KeyCode::Down => {
                if let Some(left) = form.next_field() {
                    form.on_blur(left, &self.db, &self.postal);
                }
                refresh_pickers(form, &self.db);
            }
            KeyCode::BackTab | KeyCode::Up => {
                if let Some(left) = form.prev_field() {
                    form.on_blur(left, &self.db, &self.postal);
                }
                refresh_pickers(form, &self.db);
            }
            KeyCode::PageDown => {
                if let Some(left) = form.switch_tab(true) {
                    form.on_blur(left, &self.db, &self.postal);
                }
                refresh_pickers(form, &self.db);
            }
            KeyCode::PageUp => {
                if let Some(left) = form.switch_tab(false) {
                    form.on_blur(left, &self.db, &self.postal);
                }
                refresh_pickers(form, &self.db);
            }
            KeyCode::Left => form.handle_left_right(false),
            KeyCode::Right => form.handle_left_right(true),
            KeyCode::Backspace => {
                form.handle_backspace();
                refresh_pickers(form, &self.db);
            }
            KeyCode::Delete if form.current_field() == Some(MemberField::Children) && form.child_picker.query.value.is_empty() => {
                self.status_message = match form.unlink_last_child() {
                    Some(name) => format!("{} unlinked", name),
                    None => "No linked children".to_string(),
                };
            }
            KeyCode::Delete => form.handle_delete(),
            KeyCode::Enter => match form.current_field() {
                Some(MemberField::MembershipStatus) | Some(MemberField::MinisterialFunction) if form.chooser.is_some() => {
                    form.chooser_pick();
                }
                Some(MemberField::MembershipStatus) => form.open_chooser(GuardKind::Status),
                Some(MemberField::MinisterialFunction) => form.open_chooser(GuardKind::Function),
                Some(MemberField::Children) => match form.add_highlighted_child() {
                    Ok(Some(name)) => self.status_message = format!("{} linked as child", name),
                    Ok(None) => self.status_message = "No matching member".to_string(),
                    Err(e) => self.status_message = e.to_string(),
                },
                _ => self.submit_member_form(),
            },
            KeyCode::Char(c) => {
                form.handle_char(c);
                refresh_pickers(form, &self.db);
            }
            _ => {}
        }
        Ok(false)
    }

    fn submit_member_form(&mut self) {
        let actor = self.settings.actor.label();
        let Some(form) = self.member_form.as_mut() else { return };
        match form.submit(&mut self.db, &actor) {
            Ok(member) => {
                self.status_message = format!("Member '{}' saved", member.full_name);
                self.member_form = None;
                self.members.list.reload();
                if let Some(detail) = self.detail.as_mut() {
                    detail.invalidate(DetailTab::Statistics);
                }
                self.go_back();
            }
            Err(e) => self.status_message = e.toast(),
        }
    }

    // ---- church form ----

    fn handle_church_form_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> io::Result<bool> {
        let Some(form) = self.church_form.as_mut() else {
            self.go_back();
            return Ok(false);
        };
        match key {
            KeyCode::Char('s') if modifiers.contains(KeyModifiers::CONTROL) => self.submit_church_form(),
            KeyCode::Esc => {
                self.church_form = None;
                self.go_back();
            }
            KeyCode::Tab | KeyCode::Down => {
                let left = form.move_field(true);
                form.on_blur(left, &self.db, &self.postal);
            }
            KeyCode::BackTab | KeyCode::Up => {
                let left = form.move_field(false);
                form.on_blur(left, &self.db, &self.postal);
            }
            KeyCode::Left => form.handle_left_right(false),
            KeyCode::Right => form.handle_left_right(true),
            KeyCode::Backspace => form.handle_backspace(),
            KeyCode::Delete => form.handle_delete(),
            KeyCode::Enter => self.submit_church_form(),
            KeyCode::Char(c) => form.handle_char(c),
            _ => {}
        }
        Ok(false)
    }

    fn submit_church_form(&mut self) {
        let Some(form) = self.church_form.as_mut() else { return };
        match form.submit(&mut self.db) {
            Ok(church) => {
                self.status_message = format!("Church '{}' saved", church.name);
                self.church_form = None;
                self.churches.list.reload();
                self.context.invalidate();
                if let Some(detail) = self.detail.as_mut() {
                    detail.refresh_primary(&self.db);
                }
                self.go_back();
            }
            Err(e) => self.status_message = e.toast(),
        }
    }

    // ---- activity form ----

    fn handle_activity_form_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> io::Result<bool> {
        let Some(form) = self.activity_form.as_mut() else {
            self.go_back();
            return Ok(false);
        };
        match key {
            KeyCode::Char('s') if modifiers.contains(KeyModifiers::CONTROL) => self.submit_activity_form(),
            KeyCode::Esc => {
                self.activity_form = None;
                self.go_back();
            }
            KeyCode::Tab | KeyCode::Down => {
                let left = form.move_field(true);
                form.validate_field(left);
            }
            KeyCode::BackTab | KeyCode::Up => {
                let left = form.move_field(false);
                form.validate_field(left);
            }
            KeyCode::Left => form.handle_left_right(false),
            KeyCode::Right => form.handle_left_right(true),
            KeyCode::Backspace => form.handle_backspace(),
            KeyCode::Enter => self.submit_activity_form(),
            KeyCode::Char(c) => form.handle_char(c),
            _ => {}
        }
        Ok(false)
    }

    fn submit_activity_form(&mut self) {
        let Some(form) = self.activity_form.as_mut() else { return };
        match form.submit(&mut self.db) {
            Ok(activity) => {
                self.status_message = format!("Activity '{}' scheduled", activity.name);
                self.activity_form = None;
                if let Some(detail) = self.detail.as_mut() {
                    detail.invalidate(DetailTab::History);
                    detail.invalidate(DetailTab::Statistics);
                }
                self.go_back();
            }
            Err(e) => self.status_message = e.toast(),
        }
    }

    // ---- modals ----

    fn handle_context_picker_input(&mut self, key: KeyCode, _modifiers: KeyModifiers) -> io::Result<bool> {
        let Some(menu) = self.menu.as_mut() else {
            self.go_back();
            return Ok(false);
        };
        match menu.handle_key(key, &self.db) {
            Some(MenuOutcome::Selected(ids)) => {
                self.context.select_church(ids.church_id);
                self.context.select_branch(ids.branch_id);
                let label = self.context.resolve(&self.db).label();
                self.menu = None;
                self.go_back();
                self.set_status_message(format!("Active: {}", label));
            }
            Some(MenuOutcome::Cancelled) => {
                self.menu = None;
                self.go_back();
            }
            None => {}
        }
        Ok(false)
    }

    fn handle_confirm_input(&mut self, key: KeyCode, _modifiers: KeyModifiers) -> io::Result<bool> {
        match key {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                let action = self.confirm.take();
                self.go_back();
                match action {
                    Some(PendingAction::DeleteChurch(id)) => match self.db.delete_church(id) {
                        Ok(()) => {
                            if self.context.church_id() == Some(id) {
                                self.context.select_church(None);
                            }
                            self.churches.list.reload();
                            self.set_status_message(format!("Church #{} deleted", id));
                        }
                        Err(e) => self.set_status_message(e.user_message()),
                    },
                    Some(PendingAction::DeleteMember(id)) => match self.db.delete_member(id) {
                        Ok(()) => {
                            self.members.list.reload();
                            self.set_status_message(format!("Member #{} deleted", id));
                        }
                        Err(e) => self.set_status_message(e.user_message()),
                    },
                    Some(PendingAction::Bulk(action)) => {
                        let was_active = self.context.church_id();
                        self.run_bulk(action);
                        if action == BatchAction::Delete && was_active.is_some_and(|id| self.db.church(id).is_none()) {
                            self.context.select_church(None);
                        }
                    }
                    None => {}
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.confirm = None;
                self.go_back();
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_simple_input(&mut self, key: KeyCode, _modifiers: KeyModifiers) -> io::Result<bool> {
        if self.state == AppState::MemberHistory && !matches!(key, KeyCode::Esc | KeyCode::Char('q')) {
            return Ok(false);
        }
        self.timeline = None;
        self.go_back();
        Ok(false)
    }

    /// Poll for and handle keyboard events based on current application state.
    ///
    /// Returns true if the application should quit.
    fn handle_input(&mut self) -> io::Result<bool> {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if self.state != AppState::MemberForm || self.member_form.as_ref().is_some_and(|f| f.dialog.is_none()) {
                    self.status_message.clear();
                }
                return match self.state {
                    AppState::ChurchList => self.handle_church_list_input(key.code, key.modifiers),
                    AppState::ChurchDetail => self.handle_detail_input(key.code, key.modifiers),
                    AppState::ChurchForm => self.handle_church_form_input(key.code, key.modifiers),
                    AppState::MemberList => self.handle_member_list_input(key.code, key.modifiers),
                    AppState::MemberForm => self.handle_member_form_input(key.code, key.modifiers),
                    AppState::ActivityForm => self.handle_activity_form_input(key.code, key.modifiers),
                    AppState::ContextPicker => self.handle_context_picker_input(key.code, key.modifiers),
                    AppState::Confirm => self.handle_confirm_input(key.code, key.modifiers),
                    AppState::MemberHistory | AppState::Help => self.handle_simple_input(key.code, key.modifiers),
                };
            }
        }
        Ok(false)
    }

    // ---- rendering ----

    fn render_header(&mut self, f: &mut Frame, area: Rect, title: &str) {
        let context = self.context.resolve(&self.db).label();
        let header = Paragraph::new(Line::from(vec![
            Span::styled(title.to_string(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(
                format!("Active: {}", context),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC),
            ),
        ]))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
        f.render_widget(header, area);
    }

    fn render_church_list(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(1), Constraint::Min(0)])
            .split(area);
        self.render_header(f, chunks[0], "CHURCH ADMINISTRATION");

        let filters = format!(
            " search: '{}'  state: {}  plan: {}  status: {}  sort: {:?} {:?}  selected: {}",
            self.churches.list.search,
            self.churches.state.as_deref().unwrap_or("all"),
            self.churches.plan.map(format_plan).unwrap_or("all"),
            self.churches.status.map(format_church_status).unwrap_or("all"),
            self.churches.sort,
            self.churches.direction,
            self.churches.list.selection_len(),
        );
        f.render_widget(Paragraph::new(filters).style(Style::default().fg(Color::Gray)), chunks[1]);

        let header = Row::new(["", "ID", "Name", "City", "UF", "Plan", "Status"].iter().map(|h| {
            TableCell::from(*h).style(Style::default().add_modifier(Modifier::BOLD))
        }))
        .style(Style::default().bg(DARK_GREEN).fg(Color::White));

        let list = &self.churches.list;
        let rows: Vec<Row> = if list.phase == LoadPhase::Skeleton {
            (0..list.page_size.min(8)).map(|_| skeleton_row(7)).collect()
        } else {
            list.rows
                .iter()
                .map(|c| {
                    let style = match c.status {
                        ChurchStatus::Active => Style::default().fg(Color::White),
                        ChurchStatus::Inactive => Style::default().fg(Color::DarkGray),
                        ChurchStatus::Suspended => Style::default().fg(Color::LightRed),
                    };
                    Row::new(vec![
                        TableCell::from(if list.is_selected(c.id) { "[x]" } else { "[ ]" }),
                        TableCell::from(c.id.to_string()),
                        TableCell::from(c.name.clone()),
                        TableCell::from(c.address.city.clone()),
                        TableCell::from(c.address.state.clone()),
                        TableCell::from(format_plan(c.plan)),
                        TableCell::from(format_church_status(c.status)),
                    ])
                    .style(style)
                })
                .collect()
        };

        let widths = [
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(25),
            Constraint::Length(18),
            Constraint::Length(3),
            Constraint::Length(13),
            Constraint::Length(10),
        ];
        let refreshing = if list.phase == LoadPhase::Refreshing { " - refreshing" } else { "" };
        let title = match &list.error {
            Some(err) => format!("Churches - {}", err),
            None => format!(
                "Churches ({}) - page {}/{}{} - Press 'h' for help",
                list.count,
                list.page,
                list.total_pages().max(1),
                refreshing
            ),
        };
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title))
            .row_highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
            .highlight_symbol(">> ");
        f.render_stateful_widget(table, chunks[2], &mut self.church_table);
    }

    fn render_member_list(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(1), Constraint::Min(0)])
            .split(area);
        self.render_header(f, chunks[0], "MEMBERS");

        let filters = format!(
            " search: '{}'  status: {}",
            self.members.list.search,
            self.members.status.map(format_membership_status).unwrap_or("all"),
        );
        f.render_widget(Paragraph::new(filters).style(Style::default().fg(Color::Gray)), chunks[1]);

        let header = Row::new(["ID", "Name", "Status", "Function", "Phone", "Email"].iter().map(|h| {
            TableCell::from(*h).style(Style::default().add_modifier(Modifier::BOLD))
        }))
        .style(Style::default().bg(DARK_GREEN).fg(Color::White));

        let list = &self.members.list;
        let rows: Vec<Row> = if self.members.church_id.is_none() {
            Vec::new()
        } else if list.phase == LoadPhase::Skeleton {
            (0..list.page_size.min(8)).map(|_| skeleton_row(6)).collect()
        } else {
            list.rows
                .iter()
                .map(|m| {
                    let style = match m.membership_status {
                        MembershipStatus::Active => Style::default().fg(Color::White),
                        MembershipStatus::Deceased | MembershipStatus::Excluded => Style::default().fg(Color::DarkGray),
                        _ => Style::default().fg(Color::Yellow),
                    };
                    Row::new(vec![
                        TableCell::from(m.id.to_string()),
                        TableCell::from(m.full_name.clone()),
                        TableCell::from(format_membership_status(m.membership_status)),
                        TableCell::from(format_function(m.ministerial_function)),
                        TableCell::from(m.phone.clone().unwrap_or_default()),
                        TableCell::from(m.email.clone().unwrap_or_default()),
                    ])
                    .style(style)
                })
                .collect()
        };

        let widths = [
            Constraint::Length(5),
            Constraint::Min(25),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(16),
            Constraint::Length(28),
        ];
        let title = if self.members.church_id.is_none() {
            "Members - select a church with 'c'".to_string()
        } else if let Some(err) = &list.error {
            format!("Members - {}", err)
        } else {
            format!("Members ({}) - page {}/{}", list.count, list.page, list.total_pages().max(1))
        };
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title))
            .row_highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
            .highlight_symbol(">> ");
        f.render_stateful_widget(table, chunks[2], &mut self.member_table);
    }

    fn render_church_detail(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
            .split(area);
        let Some(detail) = self.detail.as_ref() else { return };

        let name = detail.church.as_ref().map(|c| c.name.to_uppercase()).unwrap_or_default();
        let header = Paragraph::new(Line::from(Span::styled(name, Style::default().add_modifier(Modifier::BOLD))))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(header, chunks[0]);

        let selected = DetailTab::ALL.iter().position(|t| *t == detail.tab).unwrap_or(0);
        let tabs = Tabs::new(DetailTab::ALL.iter().map(|t| t.title()).collect::<Vec<_>>())
            .block(Block::default().borders(Borders::ALL))
            .select(selected)
            .highlight_style(Style::default().fg(GOLD).add_modifier(Modifier::BOLD));
        f.render_widget(tabs, chunks[1]);

        let lines: Vec<Line> = if detail.tab == DetailTab::Overview {
            match (&detail.church, &detail.error) {
                (_, Some(err)) => vec![Line::from(Span::styled(err.clone(), Style::default().fg(Color::LightRed)))],
                (Some(c), None) => {
                    let a = &c.address;
                    vec![
                        Line::from(format!("Name:         {}", c.name)),
                        Line::from(format!("Short name:   {}", c.short_name.as_deref().unwrap_or("-"))),
                        Line::from(format!("CNPJ:         {}", c.cnpj.as_deref().unwrap_or("-"))),
                        Line::from(format!("Email:        {}", c.email)),
                        Line::from(format!("Phone:        {}", c.phone.as_deref().unwrap_or("-"))),
                        Line::from(format!("Address:      {}, {} {} - {}", a.street, a.number, a.complement, a.neighborhood)),
                        Line::from(format!("              {} / {}  {}", a.city, a.state, a.zip_code)),
                        Line::from(format!("Plan:         {}", format_plan(c.plan))),
                        Line::from(format!("Status:       {}", format_church_status(c.status))),
                        Line::from(format!("Logo:         {}", c.logo.as_deref().unwrap_or("-"))),
                        Line::from(format!("Cover:        {}", c.cover_image.as_deref().unwrap_or("-"))),
                    ]
                }
                (None, None) => vec![Line::from("Loading...")],
            }
        } else {
            match detail.cache.state(detail.tab) {
                TabState::NotLoaded | TabState::Loading => vec![Line::from("Loading...")],
                TabState::Failed(msg) => vec![Line::from(Span::styled(msg.clone(), Style::default().fg(Color::LightRed)))],
                TabState::Loaded(data) => tab_lines(data),
            }
        };
        let mut title = "e edit, b add branch, n new activity, u use as active church, r refresh, Esc back".to_string();
        if self.input_mode == InputMode::BranchName {
            title = format!("New branch name: {}", self.input_buffer.value);
        }
        let body = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });
        f.render_widget(body, chunks[2]);
    }

    fn render_member_form(&mut self, f: &mut Frame, area: Rect) {
        let Some(form) = self.member_form.as_ref() else { return };
        let fields = form.visible_fields(form.tab);
        let mut constraints = vec![Constraint::Length(3), Constraint::Length(3)];
        if form.tab == MemberTab::Access && form.access_notice().is_some() {
            constraints.push(Constraint::Length(3));
        }
        constraints.extend(fields.iter().map(|_| Constraint::Length(3)));
        constraints.push(Constraint::Min(0));
        let chunks = Layout::default().direction(Direction::Vertical).constraints(constraints).split(area);

        let title = if form.is_edit() { "EDIT MEMBER" } else { "NEW MEMBER" };
        let submitting = if form.submitting { " - saving..." } else { "" };
        let header = Paragraph::new(Line::from(Span::styled(
            format!("{}{}", title, submitting),
            Style::default().add_modifier(Modifier::BOLD),
        )))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
        f.render_widget(header, chunks[0]);

        let selected = MemberTab::ALL.iter().position(|t| *t == form.tab).unwrap_or(0);
        let tabs = Tabs::new(MemberTab::ALL.iter().map(|t| t.title()).collect::<Vec<_>>())
            .block(Block::default().borders(Borders::ALL).title("PgUp/PgDn switch tab"))
            .select(selected)
            .highlight_style(Style::default().fg(GOLD).add_modifier(Modifier::BOLD));
        f.render_widget(tabs, chunks[1]);

        let mut offset = 2;
        if let (MemberTab::Access, Some(text)) = (form.tab, form.access_notice()) {
            let notice = Paragraph::new(text)
                .style(Style::default().fg(Color::Yellow))
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(notice, chunks[2]);
            offset = 3;
        }

        let current = form.current_field();
        let mut cursor = None;
        for (i, field) in fields.iter().enumerate() {
            let chunk = chunks[offset + i];
            let focused = current == Some(*field);
            let error = form.errors.get(field.key());
            let content = match field {
                MemberField::Spouse => format!(
                    "{}  (search: {}; ←/→ choose)",
                    form.display_value(*field),
                    form.spouse_picker.query.value
                ),
                MemberField::Children => {
                    let candidate = form
                        .child_picker
                        .candidates
                        .get(form.child_picker.cursor)
                        .map(|c| format!(" [Enter: link {}]", c.full_name))
                        .unwrap_or_default();
                    format!("{}{}  linked: {}  (Del: unlink last)", form.child_picker.query.value, candidate, form.display_value(*field))
                }
                MemberField::MembershipStatus | MemberField::MinisterialFunction => {
                    format!("{}  (Enter to change)", form.display_value(*field))
                }
                other => form.display_value(*other),
            };
            let block = field_block(field.label(), focused, error);
            f.render_widget(Paragraph::new(content).block(block), chunk);
            if focused {
                if let Some(input) = form.input(*field) {
                    cursor = Some((chunk, input.cursor));
                }
            }
        }

        if let Some(chooser) = form.chooser {
            let labels: Vec<&str> = match chooser.kind {
                GuardKind::Status => STATUSES.iter().map(|s| format_membership_status(*s)).collect(),
                GuardKind::Function => FUNCTIONS.iter().map(|v| format_function(*v)).collect(),
            };
            let popup = centered_rect(30, 40, area);
            f.render_widget(Clear, popup);
            let mut state = ListState::default();
            state.select(Some(chooser.index));
            let list = List::new(labels.into_iter().map(ListItem::new).collect::<Vec<_>>())
                .block(Block::default().borders(Borders::ALL).title("←/→ browse, Enter pick, Esc close"))
                .highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
                .highlight_symbol("► ");
            f.render_stateful_widget(list, popup, &mut state);
            cursor = None;
        }

        if let Some(view) = form.pending_view() {
            let popup = centered_rect(60, 35, area);
            f.render_widget(Clear, popup);
            let what = match view.kind {
                GuardKind::Status => "membership status",
                GuardKind::Function => "ministerial function",
            };
            let text = vec![
                Line::from(""),
                Line::from(Span::styled(format!("Change {}?", what), Style::default().add_modifier(Modifier::BOLD))),
                Line::from(""),
                Line::from(format!("{}  →  {}", view.current, view.next)),
                Line::from(""),
                Line::from(format!("Reason (optional): {}", self.reason.value)),
                Line::from(""),
                Line::from("Enter to confirm, Esc to keep the current value"),
            ];
            let dialog = Paragraph::new(text)
                .block(
                    Block::default()
                        .title("Confirm change")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(severity_color(view.severity)).fg(Color::White)),
                )
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            f.render_widget(dialog, popup);
            cursor = None;
        }

        if let Some((chunk, pos)) = cursor {
            f.set_cursor_position((chunk.x + pos as u16 + 1, chunk.y + 1));
        }
    }

    fn render_church_form(&mut self, f: &mut Frame, area: Rect) {
        let Some(form) = self.church_form.as_ref() else { return };
        let fields = ChurchField::ALL;
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);
        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints(std::iter::once(Constraint::Length(3)).chain((0..8).map(|_| Constraint::Length(3))).chain(std::iter::once(Constraint::Min(0))))
            .split(columns[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints(std::iter::once(Constraint::Length(3)).chain((0..7).map(|_| Constraint::Length(3))).chain(std::iter::once(Constraint::Min(0))))
            .split(columns[1]);

        let title = if form.editing.is_some() { "EDIT CHURCH" } else { "NEW CHURCH" };
        let header = Paragraph::new(Line::from(Span::styled(title, Style::default().add_modifier(Modifier::BOLD))))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(header, left[0]);
        let hint = Paragraph::new("Tab/↑↓ move, ←/→ change, Enter or Ctrl+S save, Esc cancel")
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);
        f.render_widget(hint, right[0]);

        let current = form.current_field();
        let mut cursor = None;
        for (i, field) in fields.iter().enumerate() {
            let chunk = if i < 8 { left[i + 1] } else { right[i - 7] };
            let focused = current == *field;
            let block = field_block(field.label(), focused, form.errors.get(field.key()));
            f.render_widget(Paragraph::new(form.display_value(*field)).block(block), chunk);
            if focused {
                if let Some(input) = form.input(*field) {
                    cursor = Some((chunk, input.cursor));
                }
            }
        }
        if let Some((chunk, pos)) = cursor {
            f.set_cursor_position((chunk.x + pos as u16 + 1, chunk.y + 1));
        }
    }

    fn render_activity_form(&mut self, f: &mut Frame, area: Rect) {
        let Some(form) = self.activity_form.as_ref() else { return };
        let fields = form.visible_fields();
        let mut constraints = vec![Constraint::Length(3)];
        constraints.extend(fields.iter().map(|_| Constraint::Length(3)));
        constraints.push(Constraint::Min(0));
        let chunks = Layout::default().direction(Direction::Vertical).constraints(constraints).split(area);

        let header = Paragraph::new(Line::from(Span::styled(
            "NEW ACTIVITY  (dates as YYYY-MM-DD HH:MM, space toggles recurring)",
            Style::default().add_modifier(Modifier::BOLD),
        )))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
        f.render_widget(header, chunks[0]);

        let current = form.current_field();
        let mut cursor = None;
        for (i, field) in fields.iter().enumerate() {
            let chunk = chunks[i + 1];
            let focused = current == *field;
            let block = field_block(field.label(), focused, form.errors.get(field.key()));
            f.render_widget(Paragraph::new(form.display_value(*field)).block(block), chunk);
            if focused {
                if let Some(input) = form.input(*field) {
                    cursor = Some((chunk, input.cursor));
                }
            }
        }
        if let Some((chunk, pos)) = cursor {
            f.set_cursor_position((chunk.x + pos as u16 + 1, chunk.y + 1));
        }
    }

    fn render_member_history(&mut self, f: &mut Frame, area: Rect) {
        let Some((name, timeline)) = self.timeline.as_ref() else { return };
        let mut lines = vec![
            Line::from(Span::styled(
                format!(
                    "Current status: {}",
                    timeline.current_status.as_deref().unwrap_or("-")
                ),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        if timeline.is_empty() {
            lines.push(Line::from("No history recorded"));
        }
        for entry in timeline.merged() {
            let (label, color) = match entry.kind {
                TimelineKind::Status => ("Status  ", Color::Cyan),
                TimelineKind::Function => ("Function", Color::Magenta),
            };
            let mut spans = vec![
                Span::raw(format!("{}  ", entry.when())),
                Span::styled(label, Style::default().fg(color)),
                Span::raw(format!("  {}  by {}", entry.transition(), entry.by)),
            ];
            if let Some(reason) = &entry.reason {
                spans.push(Span::styled(format!("  ({})", reason), Style::default().fg(Color::Gray)));
            }
            lines.push(Line::from(spans));
        }
        let body = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(format!("History of {} - Esc to return", name)))
            .wrap(Wrap { trim: false });
        f.render_widget(body, area);
    }

    fn render_help(&mut self, f: &mut Frame, area: Rect) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let help_text = vec![
            Line::from(Span::styled("Church Administration Help", bold)),
            Line::from(""),
            Line::from(Span::styled("Church list:", bold)),
            Line::from("  ↑/k, ↓/j     Navigate          ←/→  Previous/next page"),
            Line::from("  /            Search (applies after a short pause)"),
            Line::from("  f            Filter by state (UF)   p  Cycle plan   s  Cycle status"),
            Line::from("  1-6          Sort by name, city, state, plan, status, created (again flips)"),
            Line::from("  Space        Select row          A  Select/clear page"),
            Line::from("  o / i        Activate / deactivate selection"),
            Line::from("  X / E        Delete / export selection"),
            Line::from("  +/-          Page size           r  Reload"),
            Line::from("  Enter        Church details      a/e/d  Add/edit/delete church"),
            Line::from("  c            Choose active church/branch   m  Members"),
            Line::from("  q/Esc        Quit"),
            Line::from(""),
            Line::from(Span::styled("Church details:", bold)),
            Line::from("  Tab/←/→      Switch tab (loaded on first visit)"),
            Line::from("  b            Add branch          n  New activity"),
            Line::from("  u            Use as active church   r  Refresh   Esc  Back"),
            Line::from(""),
            Line::from(Span::styled("Members:", bold)),
            Line::from("  /  Search   s  Status filter   a  Add   Enter/e  Edit   d  Delete   H  History"),
            Line::from(""),
            Line::from(Span::styled("Forms:", bold)),
            Line::from("  Tab/↑/↓      Move between fields (checked when left)"),
            Line::from("  PgUp/PgDn    Switch member form tab"),
            Line::from("  ←/→          Change selectors; browse status/function options"),
            Line::from("  Enter        Pick option / link child / save   Ctrl+S  Save"),
            Line::from("  Esc          Close option list or cancel"),
        ];
        let paragraph = Paragraph::new(help_text)
            .block(Block::default().borders(Borders::ALL).title("Help - Press any key to return"))
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
    }

    fn render_confirm(&mut self, f: &mut Frame, area: Rect) {
        let what = match self.confirm {
            Some(PendingAction::DeleteChurch(id)) => format!("Delete church #{}", id),
            Some(PendingAction::DeleteMember(id)) => format!("Delete member #{}", id),
            Some(PendingAction::Bulk(action)) => {
                format!("{:?} {} selected churches", action, self.churches.list.selection_len())
            }
            None => String::new(),
        };
        let area = centered_rect(50, 20, area);
        f.render_widget(Clear, area);
        let text = vec![
            Line::from(""),
            Line::from(Span::styled("Are you sure you want to:", Style::default().add_modifier(Modifier::BOLD))),
            Line::from(what),
            Line::from(""),
            Line::from("This action cannot be undone."),
            Line::from(""),
            Line::from("Press 'y' to confirm, 'n' to cancel"),
        ];
        let paragraph = Paragraph::new(text)
            .block(Block::default().title("Confirm Action").borders(Borders::ALL).style(Style::default().bg(DARK_RED)))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
    }

    fn render_status_bar(&mut self, f: &mut Frame, area: Rect) {
        let text = if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            match (self.state, self.input_mode) {
                (_, InputMode::Search) => "Search: type to filter, Enter to keep, Esc to clear".to_string(),
                (_, InputMode::StateFilter) => format!("State (UF): {} (Enter to apply, empty clears)", self.input_buffer.value),
                (_, InputMode::BranchName) => "Branch name: Enter to add, Esc to cancel".to_string(),
                (AppState::ChurchList, _) => "Press 'h' for help".to_string(),
                (AppState::ChurchDetail, _) => "Church details".to_string(),
                (AppState::ChurchForm, _) => "Church form".to_string(),
                (AppState::MemberList, _) => "Members".to_string(),
                (AppState::MemberForm, _) => "Member form".to_string(),
                (AppState::MemberHistory, _) => "Member history".to_string(),
                (AppState::ActivityForm, _) => "Activity form".to_string(),
                (AppState::ContextPicker, _) => "Select active church".to_string(),
                (AppState::Help, _) => "Help".to_string(),
                (AppState::Confirm, _) => "Confirm Action".to_string(),
            }
        };
        let status = Paragraph::new(text)
            .style(Style::default().bg(DARK_GREEN).fg(Color::White))
            .alignment(Alignment::Left);
        f.render_widget(status, area);
    }

    fn render_screen(&mut self, f: &mut Frame, area: Rect, state: AppState) {
        match state {
            AppState::ChurchList => self.render_church_list(f, area),
            AppState::ChurchDetail => self.render_church_detail(f, area),
            AppState::ChurchForm => self.render_church_form(f, area),
            AppState::MemberList => self.render_member_list(f, area),
            AppState::MemberForm => self.render_member_form(f, area),
            AppState::MemberHistory => self.render_member_history(f, area),
            AppState::ActivityForm => self.render_activity_form(f, area),
            AppState::Help => self.render_help(f, area),
            AppState::ContextPicker => {
                if let Some(menu) = self.menu.as_mut() {
                    menu.render(f, area);
                }
            }
            AppState::Confirm => {}
        }
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(f.area());
        if self.state == AppState::Confirm {
            let below = self.underlying_state();
            self.render_screen(f, chunks[0], below);
            self.render_confirm(f, chunks[0]);
        } else {
            self.render_screen(f, chunks[0], self.state);
        }
        self.render_status_bar(f, chunks[1]);
    }

    /// Main event loop for the TUI application.
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            self.tick();
            terminal.draw(|f| self.render(f))?;
            if self.handle_input()? {
                break;
            }
        }
        Ok(())
    }
}

/// Search results follow what has been typed in a picker field.
fn refresh_pickers(form: &mut MemberForm, members: &dyn MemberService) {
    match form.current_field() {
        Some(MemberField::Spouse) => form.refresh_spouse_candidates(members),
        Some(MemberField::Children) => form.refresh_child_candidates(members),
        _ => {}
    }
}

fn sync_table(table: &mut TableState, cursor: usize, len: usize) {
    table.select(if len == 0 { None } else { Some(cursor.min(len - 1)) });
}

fn skeleton_row(columns: usize) -> Row<'static> {
    Row::new((0..columns).map(|_| TableCell::from("░░░░░░"))).style(Style::default().fg(Color::DarkGray))
}

fn field_block<'a>(label: &'a str, focused: bool, error: Option<&str>) -> Block<'a> {
    let title = match error {
        Some(err) => Line::from(vec![
            Span::raw(label),
            Span::styled(format!(" - {}", err), Style::default().fg(Color::LightRed)),
        ]),
        None => Line::from(label),
    };
    let border = if error.is_some() {
        Style::default().fg(Color::LightRed)
    } else if focused {
        Style::default().fg(GOLD)
    } else {
        Style::default()
    };
    Block::default().borders(Borders::ALL).title(title).border_style(border)
}

fn tab_lines(data: &TabData) -> Vec<Line<'static>> {
    match data {
        TabData::Statistics(stats) => {
            let mut lines = vec![
                Line::from(format!("Members:     {}", stats.members_total)),
                Line::from(format!("Visitors:    {} ({} converted)", stats.visitors_total, stats.visitors_converted)),
                Line::from(format!("Activities:  {}", stats.activities_total)),
                Line::from(format!("Branches:    {}", stats.branches_total)),
                Line::from(""),
            ];
            lines.extend(
                stats
                    .members_by_status
                    .iter()
                    .map(|(status, n)| Line::from(format!("  {:<12} {}", format_membership_status(*status), n))),
            );
            lines
        }
        TabData::Branches(branches) if branches.is_empty() => vec![Line::from("No branches yet (press b)")],
        TabData::Branches(branches) => branches
            .iter()
            .map(|b| {
                let marker = if b.is_active { "" } else { " (inactive)" };
                Line::from(format!("#{:<4} {}{}  {}", b.id, b.name, marker, b.address.city))
            })
            .collect(),
        TabData::Admins(admins) if admins.is_empty() => vec![Line::from("No administrators")],
        TabData::Admins(admins) => admins
            .iter()
            .map(|a| Line::from(format!("{:<30} {:<30} {}", a.full_name, a.email, format_role(a.role))))
            .collect(),
        TabData::History(activities) if activities.is_empty() => vec![Line::from("No activities scheduled (press n)")],
        TabData::History(activities) => activities
            .iter()
            .map(|a| {
                let repeat = if a.is_recurring { format!(" [{}]", format_recurrence(a.recurrence)) } else { String::new() };
                Line::from(format!(
                    "{}  {}{}  {}",
                    a.starts_at.format("%Y-%m-%d %H:%M"),
                    a.name,
                    repeat,
                    a.location.as_deref().unwrap_or("")
                ))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{church_payload, member_payload};

    fn app_with(db: Database) -> (tempfile::TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(dir.path(), db, Settings::default());
        (dir, app)
    }

    #[test]
    fn test_context_change_rescopes_members_and_persists() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let (dir, mut app) = app_with(db);

        app.context.select_church(Some(church.id));
        app.tick();
        assert_eq!(app.members.church_id, Some(church.id));
        assert_eq!(Settings::load(dir.path()).active.church_id, Some(church.id));
    }

    #[test]
    fn test_member_add_requires_active_church() {
        let (_dir, mut app) = app_with(Database::in_memory());
        app.push_state(AppState::MemberList);
        app.handle_member_list_input(KeyCode::Char('a'), KeyModifiers::NONE).unwrap();
        assert_eq!(app.state, AppState::MemberList);
        assert!(app.status_message.contains("Select a church"));
    }

    #[test]
    fn test_guarded_status_dialog_flow() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let member = db.create_member(member_payload(church.id, "Ana"), "admin").unwrap();
        let (_dir, mut app) = app_with(db);

        app.open_member_form(member.id);
        assert_eq!(app.state, AppState::MemberForm);
        if let Some(form) = app.member_form.as_mut() {
            form.focus(MemberField::MembershipStatus);
        }
        app.handle_member_form_input(KeyCode::Enter, KeyModifiers::NONE).unwrap();
        app.handle_member_form_input(KeyCode::Right, KeyModifiers::NONE).unwrap();
        app.handle_member_form_input(KeyCode::Enter, KeyModifiers::NONE).unwrap();
        let form = app.member_form.as_ref().unwrap();
        assert_eq!(form.dialog, Some(GuardKind::Status));
        assert_eq!(form.status.value(), MembershipStatus::Active);

        for c in "moved".chars() {
            app.handle_member_form_input(KeyCode::Char(c), KeyModifiers::NONE).unwrap();
        }
        app.handle_member_form_input(KeyCode::Enter, KeyModifiers::NONE).unwrap();
        let form = app.member_form.as_ref().unwrap();
        assert_eq!(form.dialog, None);
        assert_eq!(form.status.value(), MembershipStatus::Inactive);
        assert_eq!(form.status_reason.as_deref(), Some("moved"));
    }

    #[test]
    fn test_confirmed_church_delete_clears_active_context() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let (_dir, mut app) = app_with(db);
        app.context.select_church(Some(church.id));
        app.confirm = Some(PendingAction::DeleteChurch(church.id));
        app.push_state(AppState::Confirm);
        app.handle_confirm_input(KeyCode::Char('y'), KeyModifiers::NONE).unwrap();
        assert_eq!(app.state, AppState::ChurchList);
        assert_eq!(app.context.church_id(), None);
        assert!(app.db.church(church.id).is_none());
    }
}
