//! Paged list state: search, filters, sort, selection and bulk actions.
//!
//! Every fetch is stamped with a sequence number. Only the response to the newest
//! request is applied; older ones are dropped, so a slow early response can never
//! overwrite a newer result set.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::church::Church;
use crate::error::ServiceResult;
use crate::fields::*;
use crate::forms::cycle;
use crate::member::Member;
use crate::service::{BatchReport, ChurchQuery, ChurchService, MemberQuery, MemberService, Page};
use crate::views::debounce::Debounce;

/// Rows that can be selected by id.
pub trait Keyed {
    fn key(&self) -> u64;
}

impl Keyed for Church {
    fn key(&self) -> u64 {
        self.id
    }
}

impl Keyed for Member {
    fn key(&self) -> u64 {
        self.id
    }
}

/// What the table shows while a fetch is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    /// No page of the current filter set has arrived yet.
    Skeleton,
    /// Previous rows stay visible under a loading marker.
    Refreshing,
}

#[derive(Debug)]
pub struct ListState<R> {
    pub search: String,
    debounce: Debounce,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub rows: Vec<R>,
    pub count: usize,
    pub cursor: usize,
    selection: BTreeSet<u64>,
    pub phase: LoadPhase,
    pub error: Option<String>,
    issued: u64,
    has_data: bool,
    needs_fetch: bool,
}

impl<R: Keyed> ListState<R> {
    pub fn new(page_size: usize, debounce: Duration) -> Self {
        ListState {
            search: String::new(),
            debounce: Debounce::new(debounce),
            page: 1,
            page_size: page_size.max(1),
            rows: Vec::new(),
            count: 0,
            cursor: 0,
            selection: BTreeSet::new(),
            phase: LoadPhase::Idle,
            error: None,
            issued: 0,
            has_data: false,
            needs_fetch: true,
        }
    }

    /// Update the search text; the fetch waits for the debounce to fire.
    pub fn set_search(&mut self, text: &str, now: Instant) {
        self.search = text.to_string();
        self.debounce.touch_at(now);
    }

    pub fn push_search_char(&mut self, c: char, now: Instant) {
        let mut text = self.search.clone();
        text.push(c);
        self.set_search(&text, now);
    }

    pub fn pop_search_char(&mut self, now: Instant) {
        let mut text = self.search.clone();
        text.pop();
        self.set_search(&text, now);
    }

    /// Advance timers. Returns true when a fetch should be issued.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.debounce.fire_at(now) {
            debug!(search = %self.search, "search settled");
            self.filters_changed();
        }
        self.needs_fetch
    }

    /// A filter or the search text changed: back to page one, fresh result set.
    pub fn filters_changed(&mut self) {
        self.page = 1;
        self.cursor = 0;
        self.has_data = false;
        self.needs_fetch = true;
    }

    /// Same result set, new ordering or window.
    pub fn reload_from_first_page(&mut self) {
        self.page = 1;
        self.cursor = 0;
        self.needs_fetch = true;
    }

    pub fn reload(&mut self) {
        self.needs_fetch = true;
    }

    pub fn needs_fetch(&self) -> bool {
        self.needs_fetch
    }

    pub fn total_pages(&self) -> usize {
        self.count.div_ceil(self.page_size)
    }

    pub fn set_page(&mut self, page: usize) {
        let page = page.clamp(1, self.total_pages().max(1));
        if page != self.page {
            self.page = page;
            self.cursor = 0;
            self.needs_fetch = true;
        }
    }

    pub fn next_page(&mut self) {
        self.set_page(self.page + 1);
    }

    pub fn prev_page(&mut self) {
        self.set_page(self.page.saturating_sub(1));
    }

    pub fn set_page_size(&mut self, size: usize) {
        self.page_size = size.max(1);
        self.reload_from_first_page();
    }

    /// Stamp a new request and enter the matching load phase.
    pub fn begin_fetch(&mut self) -> u64 {
        self.issued += 1;
        self.needs_fetch = false;
        self.phase = if self.has_data { LoadPhase::Refreshing } else { LoadPhase::Skeleton };
        self.issued
    }

    /// Apply a response. Returns false when it was stale and dropped.
    pub fn apply(&mut self, seq: u64, result: ServiceResult<Page<R>>) -> bool {
        if seq != self.issued {
            debug!(seq, newest = self.issued, "dropping stale list response");
            return false;
        }
        self.phase = LoadPhase::Idle;
        match result {
            Ok(page) => {
                self.rows = page.results;
                self.count = page.count;
                self.has_data = true;
                self.error = None;
                if self.cursor >= self.rows.len() {
                    self.cursor = self.rows.len().saturating_sub(1);
                }
            }
            Err(e) => {
                warn!(error = %e, "list fetch failed");
                self.error = Some(e.user_message());
            }
        }
        true
    }

    pub fn move_cursor(&mut self, down: bool) {
        if !self.rows.is_empty() {
            self.cursor = cycle(self.cursor, self.rows.len(), down);
        }
    }

    pub fn current(&self) -> Option<&R> {
        self.rows.get(self.cursor)
    }

    pub fn toggle_selected(&mut self, id: u64) {
        if !self.selection.remove(&id) {
            self.selection.insert(id);
        }
    }

    pub fn toggle_current(&mut self) {
        if let Some(id) = self.current().map(Keyed::key) {
            self.toggle_selected(id);
        }
    }

    pub fn is_selected(&self, id: u64) -> bool {
        self.selection.contains(&id)
    }

    /// Select every row of the current page, or clear them if all already are.
    pub fn toggle_select_page(&mut self) {
        let ids: Vec<u64> = self.rows.iter().map(Keyed::key).collect();
        if !ids.is_empty() && ids.iter().all(|id| self.selection.contains(id)) {
            for id in ids {
                self.selection.remove(&id);
            }
        } else {
            self.selection.extend(ids);
        }
    }

    pub fn selected_ids(&self) -> Vec<u64> {
        self.selection.iter().copied().collect()
    }

    pub fn selection_len(&self) -> usize {
        self.selection.len()
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// After a bulk action: selection is consumed and the list refetched.
    pub fn bulk_finished(&mut self, report: &BatchReport) {
        info!(ok = report.success_count, failed = report.error_count, "bulk action finished");
        self.selection.clear();
        self.needs_fetch = true;
    }
}

/// Church management list.
#[derive(Debug)]
pub struct ChurchList {
    pub list: ListState<Church>,
    pub state: Option<String>,
    pub plan: Option<Plan>,
    pub status: Option<ChurchStatus>,
    pub sort: ChurchSortKey,
    pub direction: SortDirection,
}

const PLAN_FILTERS: [Option<Plan>; 5] = [None, Some(Plan::Free), Some(Plan::Basic), Some(Plan::Professional), Some(Plan::Enterprise)];
const STATUS_FILTERS: [Option<ChurchStatus>; 4] =
    [None, Some(ChurchStatus::Active), Some(ChurchStatus::Inactive), Some(ChurchStatus::Suspended)];

impl ChurchList {
    pub fn new(page_size: usize, debounce: Duration) -> Self {
        ChurchList {
            list: ListState::new(page_size, debounce),
            state: None,
            plan: None,
            status: None,
            sort: ChurchSortKey::Name,
            direction: SortDirection::Asc,
        }
    }

    pub fn query(&self) -> ChurchQuery {
        ChurchQuery {
            search: self.list.search.clone(),
            state: self.state.clone(),
            plan: self.plan,
            status: self.status,
            sort: self.sort,
            direction: self.direction,
            page: self.list.page,
            page_size: self.list.page_size,
        }
    }

    pub fn set_state_filter(&mut self, state: Option<String>) {
        self.state = state.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty());
        self.list.filters_changed();
    }

    pub fn cycle_plan_filter(&mut self) {
        let pos = PLAN_FILTERS.iter().position(|p| *p == self.plan).unwrap_or(0);
        self.plan = PLAN_FILTERS[cycle(pos, PLAN_FILTERS.len(), true)];
        self.list.filters_changed();
    }

    pub fn cycle_status_filter(&mut self) {
        let pos = STATUS_FILTERS.iter().position(|s| *s == self.status).unwrap_or(0);
        self.status = STATUS_FILTERS[cycle(pos, STATUS_FILTERS.len(), true)];
        self.list.filters_changed();
    }

    /// Same column flips direction; another column sorts ascending.
    pub fn toggle_sort(&mut self, key: ChurchSortKey) {
        if self.sort == key {
            self.direction = self.direction.flipped();
        } else {
            self.sort = key;
            self.direction = SortDirection::Asc;
        }
        self.list.reload_from_first_page();
    }

    pub fn refresh(&mut self, churches: &dyn ChurchService) {
        let seq = self.list.begin_fetch();
        let query = self.query();
        debug!(?query, seq, "fetching churches");
        let result = churches.list_churches(&query);
        self.list.apply(seq, result);
    }

    /// Run a bulk action over the selection.
    pub fn run_bulk(&mut self, action: BatchAction, churches: &mut dyn ChurchService) -> ServiceResult<BatchReport> {
        let ids = self.list.selected_ids();
        let report = churches.batch(action, &ids)?;
        self.list.bulk_finished(&report);
        self.refresh(churches);
        Ok(report)
    }
}

/// Member list scoped to the active church and branch.
#[derive(Debug)]
pub struct MemberList {
    pub list: ListState<Member>,
    pub church_id: Option<u64>,
    pub branch_id: Option<u64>,
    pub status: Option<MembershipStatus>,
}

impl MemberList {
    pub fn new(page_size: usize, debounce: Duration, church_id: Option<u64>, branch_id: Option<u64>) -> Self {
        MemberList { list: ListState::new(page_size, debounce), church_id, branch_id, status: None }
    }

    pub fn query(&self) -> MemberQuery {
        MemberQuery {
            church_id: self.church_id,
            branch_id: self.branch_id,
            search: self.list.search.clone(),
            status: self.status,
            page: self.list.page,
            page_size: self.list.page_size,
        }
    }

    /// The active context moved; rows of the old scope are meaningless.
    pub fn set_scope(&mut self, church_id: Option<u64>, branch_id: Option<u64>) {
        if (self.church_id, self.branch_id) != (church_id, branch_id) {
            self.church_id = church_id;
            self.branch_id = branch_id;
            self.list.clear_selection();
            self.list.filters_changed();
        }
    }

    pub fn cycle_status_filter(&mut self) {
        const OPTIONS: [Option<MembershipStatus>; 7] = [
            None,
            Some(MembershipStatus::Active),
            Some(MembershipStatus::Inactive),
            Some(MembershipStatus::Disciplined),
            Some(MembershipStatus::Transferred),
            Some(MembershipStatus::Excluded),
            Some(MembershipStatus::Deceased),
        ];
        let pos = OPTIONS.iter().position(|s| *s == self.status).unwrap_or(0);
        self.status = OPTIONS[cycle(pos, OPTIONS.len(), true)];
        self.list.filters_changed();
    }

    pub fn refresh(&mut self, members: &dyn MemberService) {
        let seq = self.list.begin_fetch();
        let query = self.query();
        debug!(?query, seq, "fetching members");
        let result = members.list_members(&query);
        self.list.apply(seq, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::church_payload;
    use crate::db::Database;
    use crate::error::ServiceError;

    fn churches(db: &mut Database, n: usize) {
        for i in 0..n {
            db.create_church(church_payload(&format!("Igreja {:02}", i), &format!("c{}@x.org", i))).unwrap();
        }
    }

    fn page_of(db: &Database, query: &ChurchQuery) -> ServiceResult<Page<Church>> {
        db.list_churches(query)
    }

    #[test]
    fn test_search_is_debounced_and_resets_page() {
        let mut db = Database::in_memory();
        churches(&mut db, 25);
        let mut view = ChurchList::new(10, Duration::from_millis(500));
        view.refresh(&db);
        view.list.next_page();
        assert_eq!(view.list.page, 2);
        view.refresh(&db);

        let start = Instant::now();
        view.list.set_search("igreja 2", start);
        assert!(!view.list.tick(start + Duration::from_millis(100)));
        view.list.push_search_char('1', start + Duration::from_millis(200));
        assert!(!view.list.tick(start + Duration::from_millis(600)));
        assert!(view.list.tick(start + Duration::from_millis(700)));
        assert_eq!(view.list.page, 1);
        view.refresh(&db);
        assert_eq!(view.list.count, 1);
        assert_eq!(view.list.rows[0].name, "Igreja 21");
    }

    #[test]
    fn test_stale_response_is_dropped() {
        let mut db = Database::in_memory();
        churches(&mut db, 3);
        let mut view = ChurchList::new(10, Duration::ZERO);
        let first = view.list.begin_fetch();
        let first_query = view.query();
        view.list.set_search("igreja 01", Instant::now());
        view.list.filters_changed();
        let second = view.list.begin_fetch();
        let second_query = view.query();

        assert!(view.list.apply(second, page_of(&db, &second_query)));
        assert!(!view.list.apply(first, page_of(&db, &first_query)));
        assert_eq!(view.list.count, 1);
    }

    #[test]
    fn test_skeleton_only_before_first_page() {
        let mut db = Database::in_memory();
        churches(&mut db, 2);
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.list.begin_fetch();
        assert_eq!(view.list.phase, LoadPhase::Skeleton);
        view.list.phase = LoadPhase::Idle;
        view.refresh(&db);
        assert_eq!(view.list.phase, LoadPhase::Idle);

        view.toggle_sort(ChurchSortKey::City);
        view.list.begin_fetch();
        assert_eq!(view.list.phase, LoadPhase::Refreshing);

        view.cycle_plan_filter();
        view.list.begin_fetch();
        assert_eq!(view.list.phase, LoadPhase::Skeleton);
    }

    #[test]
    fn test_failed_fetch_keeps_rows() {
        let mut db = Database::in_memory();
        churches(&mut db, 2);
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.refresh(&db);
        let seq = view.list.begin_fetch();
        view.list.apply(seq, Err(ServiceError::Lookup("offline".to_string())));
        assert_eq!(view.list.rows.len(), 2);
        assert!(view.list.error.is_some());
    }

    #[test]
    fn test_sort_toggles_direction() {
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.list.page = 3;
        view.toggle_sort(ChurchSortKey::Name);
        assert_eq!(view.direction, SortDirection::Desc);
        assert_eq!(view.list.page, 1);
        view.toggle_sort(ChurchSortKey::Plan);
        assert_eq!((view.sort, view.direction), (ChurchSortKey::Plan, SortDirection::Asc));
    }

    #[test]
    fn test_selection_survives_paging_and_clears_after_bulk() {
        let mut db = Database::in_memory();
        churches(&mut db, 15);
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.refresh(&db);
        view.list.toggle_select_page();
        assert_eq!(view.list.selection_len(), 10);
        view.list.next_page();
        view.refresh(&db);
        view.list.toggle_current();
        assert_eq!(view.list.selection_len(), 11);
        assert_eq!(view.list.total_pages(), 2);

        let report = view.run_bulk(BatchAction::Deactivate, &mut db).unwrap();
        assert_eq!(report.success_count, 11);
        assert_eq!(view.list.selection_len(), 0);
        assert!(db.churches.iter().filter(|c| c.status == ChurchStatus::Inactive).count() == 11);
    }

    #[test]
    fn test_select_page_toggles_off() {
        let mut db = Database::in_memory();
        churches(&mut db, 3);
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.refresh(&db);
        view.list.toggle_select_page();
        view.list.toggle_select_page();
        assert_eq!(view.list.selection_len(), 0);
    }

    #[test]
    fn test_page_size_change_resets_page() {
        let mut view = ChurchList::new(10, Duration::ZERO);
        view.list.count = 45;
        view.list.set_page(5);
        assert_eq!(view.list.page, 5);
        view.list.set_page(9);
        assert_eq!(view.list.page, 5);
        view.list.set_page_size(50);
        assert_eq!(view.list.page, 1);
        assert_eq!(view.list.total_pages(), 1);
    }
}
