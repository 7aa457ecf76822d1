//! Church detail screen state with lazily loaded tabs.
//!
//! The primary entity is loaded when the screen opens. Every other tab is
//! fetched the first time it is activated and then kept for the rest of the
//! visit, so switching back and forth costs nothing.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::church::{Address, Branch, Church, ChurchAdmin, ChurchStatistics};
use crate::error::ServiceResult;
use crate::service::ChurchService;

/// Load state of one tab.
#[derive(Debug, Clone, PartialEq)]
pub enum TabState<V> {
    NotLoaded,
    Loading,
    Loaded(V),
    Failed(String),
}

/// Per-tab cache keyed by tab.
#[derive(Debug)]
pub struct TabCache<K, V> {
    tabs: BTreeMap<K, TabState<V>>,
    not_loaded: TabState<V>,
}

impl<K: Ord + Copy, V> Default for TabCache<K, V> {
    fn default() -> Self {
        TabCache { tabs: BTreeMap::new(), not_loaded: TabState::NotLoaded }
    }
}

impl<K: Ord + Copy, V> TabCache<K, V> {
    pub fn state(&self, key: K) -> &TabState<V> {
        self.tabs.get(&key).unwrap_or(&self.not_loaded)
    }

    pub fn get(&self, key: K) -> Option<&V> {
        match self.tabs.get(&key) {
            Some(TabState::Loaded(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        match self.tabs.get_mut(&key) {
            Some(TabState::Loaded(v)) => Some(v),
            _ => None,
        }
    }

    pub fn needs_load(&self, key: K) -> bool {
        matches!(self.state(key), TabState::NotLoaded)
    }

    pub fn mark_loading(&mut self, key: K) {
        self.tabs.insert(key, TabState::Loading);
    }

    pub fn store(&mut self, key: K, result: ServiceResult<V>) {
        let state = match result {
            Ok(v) => TabState::Loaded(v),
            Err(e) => {
                warn!(error = %e, "tab load failed");
                TabState::Failed(e.user_message())
            }
        };
        self.tabs.insert(key, state);
    }

    pub fn invalidate(&mut self, key: K) {
        self.tabs.remove(&key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DetailTab {
    Overview,
    Statistics,
    Branches,
    Admins,
    History,
}

impl DetailTab {
    pub const ALL: [DetailTab; 5] =
        [DetailTab::Overview, DetailTab::Statistics, DetailTab::Branches, DetailTab::Admins, DetailTab::History];

    pub fn title(self) -> &'static str {
        match self {
            DetailTab::Overview => "Overview",
            DetailTab::Statistics => "Statistics",
            DetailTab::Branches => "Branches",
            DetailTab::Admins => "Admins",
            DetailTab::History => "Activities",
        }
    }
}

/// Payload of a secondary tab.
#[derive(Debug, Clone, PartialEq)]
pub enum TabData {
    Statistics(ChurchStatistics),
    Branches(Vec<Branch>),
    Admins(Vec<ChurchAdmin>),
    History(Vec<Activity>),
}

pub struct ChurchDetail {
    pub church_id: u64,
    pub church: Option<Church>,
    pub error: Option<String>,
    pub tab: DetailTab,
    pub cache: TabCache<DetailTab, TabData>,
}

impl ChurchDetail {
    pub fn open(church_id: u64, churches: &dyn ChurchService) -> Self {
        let mut detail = ChurchDetail {
            church_id,
            church: None,
            error: None,
            tab: DetailTab::Overview,
            cache: TabCache::default(),
        };
        detail.refresh_primary(churches);
        detail
    }

    /// Re-fetch only the church itself; loaded tabs stay as they are.
    pub fn refresh_primary(&mut self, churches: &dyn ChurchService) {
        match churches.get_church(self.church_id) {
            Ok(church) => {
                self.church = Some(church);
                self.error = None;
            }
            Err(e) => {
                warn!(church_id = self.church_id, error = %e, "church could not be loaded");
                self.error = Some(e.user_message());
            }
        }
    }

    pub fn activate_tab(&mut self, tab: DetailTab, churches: &dyn ChurchService) {
        self.tab = tab;
        if tab == DetailTab::Overview || !self.cache.needs_load(tab) {
            return;
        }
        debug!(church_id = self.church_id, ?tab, "loading tab");
        self.cache.mark_loading(tab);
        let id = self.church_id;
        let result = match tab {
            DetailTab::Statistics => churches.church_statistics(id).map(TabData::Statistics),
            DetailTab::Branches => churches.list_branches(id).map(TabData::Branches),
            DetailTab::Admins => churches.list_admins(id).map(TabData::Admins),
            DetailTab::History => churches.list_activities(id).map(TabData::History),
            DetailTab::Overview => return,
        };
        self.cache.store(tab, result);
    }

    pub fn step_tab(&mut self, forward: bool, churches: &dyn ChurchService) {
        let idx = DetailTab::ALL.iter().position(|t| *t == self.tab).unwrap_or(0);
        let next = crate::forms::cycle(idx, DetailTab::ALL.len(), forward);
        self.activate_tab(DetailTab::ALL[next], churches);
    }

    /// Put a newly created branch into the loaded list without refetching.
    pub fn append_branch(&mut self, branch: Branch) {
        if let Some(TabData::Branches(branches)) = self.cache.get_mut(DetailTab::Branches) {
            branches.push(branch);
        }
        if let Some(TabData::Statistics(stats)) = self.cache.get_mut(DetailTab::Statistics) {
            stats.branches_total += 1;
        }
    }

    pub fn create_branch(&mut self, name: &str, address: Address, churches: &mut dyn ChurchService) -> ServiceResult<Branch> {
        let branch = churches.create_branch(self.church_id, name, address)?;
        info!(church_id = self.church_id, branch_id = branch.id, "branch added from detail view");
        self.append_branch(branch.clone());
        Ok(branch)
    }

    /// A tab affected by an edit made elsewhere is fetched again on next view.
    pub fn invalidate(&mut self, tab: DetailTab) {
        self.cache.invalidate(tab);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::Path;

    use super::*;
    use crate::activity::ActivityPayload;
    use crate::church::ChurchPayload;
    use crate::db::tests::church_payload;
    use crate::db::Database;
    use crate::fields::{AssetKind, BatchAction};
    use crate::service::{BatchReport, ChurchQuery, Page};

    /// Database wrapper counting calls per operation.
    struct Counting {
        db: Database,
        calls: RefCell<BTreeMap<&'static str, usize>>,
    }

    impl Counting {
        fn hit(&self, op: &'static str) {
            *self.calls.borrow_mut().entry(op).or_insert(0) += 1;
        }

        fn count(&self, op: &'static str) -> usize {
            self.calls.borrow().get(op).copied().unwrap_or(0)
        }
    }

    impl ChurchService for Counting {
        fn list_churches(&self, query: &ChurchQuery) -> ServiceResult<Page<Church>> {
            self.hit("list_churches");
            self.db.list_churches(query)
        }
        fn get_church(&self, id: u64) -> ServiceResult<Church> {
            self.hit("get_church");
            self.db.get_church(id)
        }
        fn create_church(&mut self, payload: ChurchPayload) -> ServiceResult<Church> {
            self.db.create_church(payload)
        }
        fn update_church(&mut self, id: u64, payload: ChurchPayload) -> ServiceResult<Church> {
            self.db.update_church(id, payload)
        }
        fn delete_church(&mut self, id: u64) -> ServiceResult<()> {
            self.db.delete_church(id)
        }
        fn batch(&mut self, action: BatchAction, ids: &[u64]) -> ServiceResult<BatchReport> {
            self.db.batch(action, ids)
        }
        fn upload_asset(&mut self, church_id: u64, kind: AssetKind, file: &Path) -> ServiceResult<()> {
            self.db.upload_asset(church_id, kind, file)
        }
        fn remove_asset(&mut self, church_id: u64, kind: AssetKind) -> ServiceResult<()> {
            self.db.remove_asset(church_id, kind)
        }
        fn church_statistics(&self, church_id: u64) -> ServiceResult<ChurchStatistics> {
            self.hit("church_statistics");
            self.db.church_statistics(church_id)
        }
        fn list_branches(&self, church_id: u64) -> ServiceResult<Vec<Branch>> {
            self.hit("list_branches");
            self.db.list_branches(church_id)
        }
        fn create_branch(&mut self, church_id: u64, name: &str, address: Address) -> ServiceResult<Branch> {
            self.hit("create_branch");
            self.db.create_branch(church_id, name, address)
        }
        fn list_admins(&self, church_id: u64) -> ServiceResult<Vec<ChurchAdmin>> {
            self.hit("list_admins");
            self.db.list_admins(church_id)
        }
        fn list_activities(&self, church_id: u64) -> ServiceResult<Vec<Activity>> {
            self.hit("list_activities");
            self.db.list_activities(church_id)
        }
        fn create_activity(&mut self, payload: ActivityPayload) -> ServiceResult<Activity> {
            self.db.create_activity(payload)
        }
        fn cnpj_in_use(&self, cnpj: &str, exclude: Option<u64>) -> ServiceResult<bool> {
            self.db.cnpj_in_use(cnpj, exclude)
        }
        fn church_email_in_use(&self, email: &str, exclude: Option<u64>) -> ServiceResult<bool> {
            self.db.church_email_in_use(email, exclude)
        }
    }

    fn setup() -> (Counting, u64) {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        db.create_branch(church.id, "Centro", Address::default()).unwrap();
        (Counting { db, calls: RefCell::new(BTreeMap::new()) }, church.id)
    }

    #[test]
    fn test_tabs_fetch_once_per_visit() {
        let (svc, id) = setup();
        let mut detail = ChurchDetail::open(id, &svc);
        assert_eq!(svc.count("get_church"), 1);
        assert_eq!(svc.count("list_branches"), 0);

        detail.activate_tab(DetailTab::Branches, &svc);
        detail.activate_tab(DetailTab::Statistics, &svc);
        detail.activate_tab(DetailTab::Branches, &svc);
        detail.step_tab(true, &svc);
        detail.step_tab(false, &svc);
        assert_eq!(svc.count("list_branches"), 1);
        assert_eq!(svc.count("church_statistics"), 1);
        assert_eq!(svc.count("list_admins"), 1);
        assert_eq!(svc.count("list_activities"), 0);
    }

    #[test]
    fn test_refresh_only_refetches_primary() {
        let (svc, id) = setup();
        let mut detail = ChurchDetail::open(id, &svc);
        detail.activate_tab(DetailTab::Branches, &svc);
        detail.refresh_primary(&svc);
        detail.activate_tab(DetailTab::Branches, &svc);
        assert_eq!(svc.count("get_church"), 2);
        assert_eq!(svc.count("list_branches"), 1);
    }

    #[test]
    fn test_created_branch_appended_in_place() {
        let (mut svc, id) = setup();
        let mut detail = ChurchDetail::open(id, &svc);
        detail.activate_tab(DetailTab::Branches, &svc);
        detail.create_branch("Vila Nova", Address::default(), &mut svc).unwrap();
        match detail.cache.get(DetailTab::Branches) {
            Some(TabData::Branches(branches)) => assert_eq!(branches.len(), 2),
            other => panic!("unexpected tab state: {:?}", other),
        }
        assert_eq!(svc.count("list_branches"), 1);
    }

    #[test]
    fn test_missing_church_reports_error() {
        let (svc, _) = setup();
        let mut detail = ChurchDetail::open(99, &svc);
        assert!(detail.church.is_none());
        assert!(detail.error.is_some());
        detail.activate_tab(DetailTab::Admins, &svc);
        assert!(matches!(detail.cache.state(DetailTab::Admins), TabState::Failed(_)));
    }
}
