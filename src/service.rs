//! Service collaborator contracts.
//!
//! Screens and forms talk to these traits rather than to the data store, so the
//! same state machines run against the bundled JSON database and against the
//! counting doubles used in tests.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityPayload};
use crate::church::{Address, Branch, Church, ChurchAdmin, ChurchPayload, ChurchStatistics};
use crate::error::ServiceResult;
use crate::fields::*;
use crate::member::{FunctionHistoryEntry, Member, MemberPayload, MembershipStatusLog};

/// One page of a collection plus the total number of matching records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub count: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page { results: Vec::new(), count: 0 }
    }
}

/// Filters, sort and window for the church management list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChurchQuery {
    pub search: String,
    pub state: Option<String>,
    pub plan: Option<Plan>,
    pub status: Option<ChurchStatus>,
    pub sort: ChurchSortKey,
    pub direction: SortDirection,
    /// 1-based page index.
    pub page: usize,
    pub page_size: usize,
}

impl Default for ChurchQuery {
    fn default() -> Self {
        ChurchQuery {
            search: String::new(),
            state: None,
            plan: None,
            status: None,
            sort: ChurchSortKey::Name,
            direction: SortDirection::Asc,
            page: 1,
            page_size: 20,
        }
    }
}

/// Filters and window for member lists.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberQuery {
    pub church_id: Option<u64>,
    pub branch_id: Option<u64>,
    pub search: String,
    pub status: Option<MembershipStatus>,
    pub page: usize,
    pub page_size: usize,
}

impl Default for MemberQuery {
    fn default() -> Self {
        MemberQuery {
            church_id: None,
            branch_id: None,
            search: String::new(),
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// Per-item outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    /// File written by an export, if any.
    pub output: Option<String>,
}

pub trait ChurchService {
    fn list_churches(&self, query: &ChurchQuery) -> ServiceResult<Page<Church>>;
    fn get_church(&self, id: u64) -> ServiceResult<Church>;
    fn create_church(&mut self, payload: ChurchPayload) -> ServiceResult<Church>;
    fn update_church(&mut self, id: u64, payload: ChurchPayload) -> ServiceResult<Church>;
    fn delete_church(&mut self, id: u64) -> ServiceResult<()>;
    fn batch(&mut self, action: BatchAction, ids: &[u64]) -> ServiceResult<BatchReport>;
    fn upload_asset(&mut self, church_id: u64, kind: AssetKind, file: &Path) -> ServiceResult<()>;
    fn remove_asset(&mut self, church_id: u64, kind: AssetKind) -> ServiceResult<()>;
    fn church_statistics(&self, church_id: u64) -> ServiceResult<ChurchStatistics>;
    fn list_branches(&self, church_id: u64) -> ServiceResult<Vec<Branch>>;
    fn create_branch(&mut self, church_id: u64, name: &str, address: Address) -> ServiceResult<Branch>;
    fn list_admins(&self, church_id: u64) -> ServiceResult<Vec<ChurchAdmin>>;
    fn list_activities(&self, church_id: u64) -> ServiceResult<Vec<Activity>>;
    fn create_activity(&mut self, payload: ActivityPayload) -> ServiceResult<Activity>;
    /// Whether a CNPJ already belongs to a church other than `exclude`.
    fn cnpj_in_use(&self, cnpj: &str, exclude: Option<u64>) -> ServiceResult<bool>;
    fn church_email_in_use(&self, email: &str, exclude: Option<u64>) -> ServiceResult<bool>;
}

pub trait MemberService {
    fn list_members(&self, query: &MemberQuery) -> ServiceResult<Page<Member>>;
    fn get_member(&self, id: u64) -> ServiceResult<Member>;
    fn create_member(&mut self, payload: MemberPayload, actor: &str) -> ServiceResult<Member>;
    fn update_member(&mut self, id: u64, payload: MemberPayload, actor: &str) -> ServiceResult<Member>;
    fn delete_member(&mut self, id: u64) -> ServiceResult<()>;
    /// Name search used by the spouse and children pickers.
    fn search_members(&self, church_id: u64, text: &str, exclude: Option<u64>) -> ServiceResult<Vec<Member>>;
    fn email_in_use(&self, email: &str, exclude: Option<u64>) -> ServiceResult<bool>;
}

pub trait HistoryService {
    fn function_history(&self, member_id: u64) -> ServiceResult<Vec<FunctionHistoryEntry>>;
    fn status_log(&self, member_id: u64) -> ServiceResult<MembershipStatusLog>;
}

/// Postal code lookup used to pre-fill address fields.
pub trait AddressLookup {
    fn lookup(&self, zip_code: &str) -> ServiceResult<Address>;
}
