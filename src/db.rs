//! Database operations and utility functions for church administration.
//!
//! This module provides the `Database` struct, a JSON-file backed store that
//! implements the service collaborator traits, along with formatting helpers used
//! by the CLI tables and the terminal user interface.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{Activity, ActivityPayload};
use crate::church::*;
use crate::error::{ServiceError, ServiceResult};
use crate::fields::*;
use crate::member::*;
use crate::service::*;

/// Largest accepted logo or cover image.
pub const MAX_ASSET_BYTES: u64 = 5 * 1024 * 1024;
const ASSET_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// In-memory database for churches, members and related records.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub denominations: Vec<Denomination>,
    #[serde(default)]
    pub churches: Vec<Church>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub visitors: Vec<Visitor>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub status_log: Vec<StatusLogEntry>,
    #[serde(default)]
    pub function_history: Vec<FunctionHistoryEntry>,
    /// File the database was opened from; `None` keeps everything in memory.
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Database {
    /// Load database from JSON file, creating a new empty database if file doesn't exist.
    pub fn load(path: &Path) -> Self {
        let mut db = if !path.exists() {
            Database::default()
        } else {
            let mut buf = String::new();
            match File::open(path).and_then(|mut f| f.read_to_string(&mut buf)) {
                Ok(_) => match serde_json::from_str(&buf) {
                    Ok(db) => db,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "error parsing data file, starting fresh");
                        Database::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error reading data file, starting fresh");
                    Database::default()
                }
            }
        };
        db.path = Some(path.to_path_buf());
        db
    }

    /// A database that is never written to disk.
    pub fn in_memory() -> Self {
        Database::default()
    }

    /// Save database to JSON file using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Write back to the file the database was loaded from.
    pub fn persist(&self) -> ServiceResult<()> {
        if let Some(path) = &self.path {
            self.save(path)?;
        }
        Ok(())
    }

    /// Save after a change. When the write fails the records go back to `before`
    /// so memory never holds anything the data file does not.
    fn commit(&mut self, before: Database) -> ServiceResult<()> {
        if let Err(e) = self.persist() {
            warn!(error = %e, "save failed, change rolled back");
            *self = before;
            return Err(e);
        }
        Ok(())
    }

    /// Directory holding the data file, assets and exports.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.path
            .as_ref()
            .map(|p| p.parent().unwrap_or_else(|| Path::new(".")).to_path_buf())
    }

    pub fn next_church_id(&self) -> u64 {
        self.churches.iter().map(|c| c.id).max().unwrap_or(0) + 1
    }

    pub fn next_member_id(&self) -> u64 {
        self.members.iter().map(|m| m.id).max().unwrap_or(0) + 1
    }

    fn next_user_id(&self) -> u64 {
        self.members.iter().filter_map(|m| m.user_id).max().unwrap_or(0) + 1
    }

    pub fn church(&self, id: u64) -> Option<&Church> {
        self.churches.iter().find(|c| c.id == id)
    }

    fn church_mut(&mut self, id: u64) -> ServiceResult<&mut Church> {
        self.churches
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(ServiceError::NotFound { entity: "church", id })
    }

    pub fn member(&self, id: u64) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn branch(&self, id: u64) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    /// Register a denomination.
    pub fn add_denomination(&mut self, name: &str, abbreviation: Option<String>, city: Option<String>) -> ServiceResult<Denomination> {
        let before = self.clone();
        if name.trim().is_empty() {
            return Err(ServiceError::Invalid { field: "name", message: "Name is required".to_string() });
        }
        let denomination = Denomination {
            id: self.denominations.iter().map(|d| d.id).max().unwrap_or(0) + 1,
            name: name.trim().to_string(),
            abbreviation,
            headquarters_city: city,
            created_at_utc: Utc::now().timestamp(),
        };
        self.denominations.push(denomination.clone());
        self.commit(before)?;
        info!(id = denomination.id, "denomination created");
        Ok(denomination)
    }

    /// Record a first-time visitor.
    pub fn add_visitor(
        &mut self,
        church_id: u64,
        full_name: &str,
        phone: Option<String>,
        email: Option<String>,
        first_visit: NaiveDate,
    ) -> ServiceResult<Visitor> {
        let before = self.clone();
        if self.church(church_id).is_none() {
            return Err(ServiceError::NotFound { entity: "church", id: church_id });
        }
        if full_name.trim().is_empty() {
            return Err(ServiceError::Invalid { field: "full_name", message: "Name is required".to_string() });
        }
        let visitor = Visitor {
            id: self.visitors.iter().map(|v| v.id).max().unwrap_or(0) + 1,
            church_id,
            branch_id: None,
            full_name: full_name.trim().to_string(),
            phone,
            email,
            first_visit,
            converted_member_id: None,
            notes: None,
        };
        self.visitors.push(visitor.clone());
        self.commit(before)?;
        info!(id = visitor.id, church_id, "visitor recorded");
        Ok(visitor)
    }

    pub fn list_visitors(&self, church_id: u64) -> Vec<&Visitor> {
        let mut visitors: Vec<&Visitor> = self.visitors.iter().filter(|v| v.church_id == church_id).collect();
        visitors.sort_by_key(|v| (std::cmp::Reverse(v.first_visit), v.id));
        visitors
    }

    /// Turn a visitor into an active member of the same church.
    pub fn convert_visitor(&mut self, visitor_id: u64, actor: &str) -> ServiceResult<Member> {
        let before = self.clone();
        let visitor = self
            .visitors
            .iter()
            .find(|v| v.id == visitor_id)
            .cloned()
            .ok_or(ServiceError::NotFound { entity: "visitor", id: visitor_id })?;
        if let Some(member_id) = visitor.converted_member_id {
            return Err(ServiceError::Invalid {
                field: "visitor",
                message: format!("Visitor already converted to member #{}", member_id),
            });
        }
        let payload = MemberPayload {
            church_id: visitor.church_id,
            branch_id: visitor.branch_id,
            full_name: visitor.full_name.clone(),
            cpf: None,
            birth_date: None,
            gender: None,
            email: visitor.email.clone(),
            phone: visitor.phone.clone(),
            address: Address::default(),
            marital_status: MaritalStatus::Single,
            spouse_id: None,
            children_ids: Vec::new(),
            children_count: None,
            membership_status: MembershipStatus::Active,
            ministerial_function: MinisterialFunction::Member,
            membership_date: Some(Local::now().date_naive()),
            status_change_reason: Some("Converted from visitor".to_string()),
            function_change_reason: None,
            access: None,
        };
        let member = self.create_member(payload, actor)?;
        if let Some(v) = self.visitors.iter_mut().find(|v| v.id == visitor_id) {
            v.converted_member_id = Some(member.id);
        }
        self.commit(before)?;
        Ok(member)
    }

    fn check_church_payload(&self, payload: &ChurchPayload, exclude: Option<u64>) -> ServiceResult<()> {
        if payload.name.trim().is_empty() {
            return Err(ServiceError::Invalid { field: "name", message: "Name is required".to_string() });
        }
        if let Some(denomination_id) = payload.denomination_id {
            if !self.denominations.iter().any(|d| d.id == denomination_id) {
                return Err(ServiceError::NotFound { entity: "denomination", id: denomination_id });
            }
        }
        if let Some(cnpj) = payload.cnpj.as_deref() {
            if self.cnpj_in_use(cnpj, exclude)? {
                return Err(ServiceError::Conflict { field: "cnpj", value: cnpj.to_string() });
            }
        }
        if self.church_email_in_use(&payload.email, exclude)? {
            return Err(ServiceError::Conflict { field: "email", value: payload.email.clone() });
        }
        Ok(())
    }

    fn check_member_payload(&self, payload: &MemberPayload, exclude: Option<u64>) -> ServiceResult<()> {
        if payload.full_name.trim().is_empty() {
            return Err(ServiceError::Invalid { field: "full_name", message: "Full name is required".to_string() });
        }
        if self.church(payload.church_id).is_none() {
            return Err(ServiceError::NotFound { entity: "church", id: payload.church_id });
        }
        if let Some(email) = payload.email.as_deref() {
            if self.email_in_use(email, exclude)? {
                return Err(ServiceError::Conflict { field: "email", value: email.to_string() });
            }
        }
        if let Some(cpf) = payload.cpf.as_deref() {
            let digits = digits_only(cpf);
            if self
                .members
                .iter()
                .any(|m| Some(m.id) != exclude && m.cpf.as_deref().map(digits_only).as_deref() == Some(digits.as_str()))
            {
                return Err(ServiceError::Conflict { field: "cpf", value: cpf.to_string() });
            }
        }
        if let Some(spouse_id) = payload.spouse_id {
            if Some(spouse_id) == exclude || self.member(spouse_id).is_none() {
                return Err(ServiceError::Invalid { field: "spouse", message: format!("Member #{} cannot be linked as spouse", spouse_id) });
            }
        }
        if exclude.is_some() && payload.children_ids.iter().any(|&c| Some(c) == exclude) {
            return Err(ServiceError::Invalid { field: "children", message: "A member cannot be their own child".to_string() });
        }
        Ok(())
    }

    fn apply_access(&mut self, idx: usize, access: &SystemAccess) {
        if !access.create_system_user {
            let member = &mut self.members[idx];
            if member.user_id.is_some() {
                info!(member_id = member.id, "system access revoked");
            }
            member.user_id = None;
            member.system_role = None;
            member.user_email = None;
            return;
        }
        let user_id = match self.members[idx].user_id {
            Some(id) => id,
            None => self.next_user_id(),
        };
        let member = &mut self.members[idx];
        member.user_id = Some(user_id);
        member.system_role = access.system_role;
        member.user_email = access.user_email.clone();
    }

    fn record_status(&mut self, member_id: u64, old: Option<MembershipStatus>, new: MembershipStatus, actor: &str, reason: Option<String>) {
        self.status_log.push(StatusLogEntry {
            member_id,
            old_value: old,
            new_value: new,
            old_display: old.map(format_membership_status).unwrap_or("-").to_string(),
            new_display: format_membership_status(new).to_string(),
            changed_at_utc: Utc::now().timestamp(),
            changed_by: actor.to_string(),
            reason,
        });
    }

    fn record_function(&mut self, member_id: u64, old: Option<MinisterialFunction>, new: MinisterialFunction, actor: &str, reason: Option<String>) {
        self.function_history.push(FunctionHistoryEntry {
            member_id,
            old_value: old,
            new_value: new,
            old_display: old.map(format_function).unwrap_or("-").to_string(),
            new_display: format_function(new).to_string(),
            changed_at_utc: Utc::now().timestamp(),
            changed_by: actor.to_string(),
            reason,
        });
    }

    fn export_churches(&self, ids: &[u64]) -> ServiceResult<(usize, Vec<String>, Option<String>)> {
        let mut lines = vec!["id,name,short_name,cnpj,email,phone,city,state,plan,status".to_string()];
        let mut errors = Vec::new();
        let mut exported = 0;
        for &id in ids {
            match self.church(id) {
                Some(c) => {
                    lines.push(
                        [
                            c.id.to_string(),
                            csv_field(&c.name),
                            csv_field(c.short_name.as_deref().unwrap_or("")),
                            csv_field(c.cnpj.as_deref().unwrap_or("")),
                            csv_field(&c.email),
                            csv_field(c.phone.as_deref().unwrap_or("")),
                            csv_field(&c.address.city),
                            csv_field(&c.address.state),
                            format_plan(c.plan).to_string(),
                            format_church_status(c.status).to_string(),
                        ]
                        .join(","),
                    );
                    exported += 1;
                }
                None => errors.push(format!("Church #{} not found", id)),
            }
        }
        let output = match self.data_dir() {
            Some(dir) => {
                let exports = dir.join("exports");
                fs::create_dir_all(&exports)?;
                let file = exports.join(format!("churches-{}.csv", Local::now().format("%Y%m%d-%H%M%S")));
                fs::write(&file, lines.join("\n") + "\n")?;
                Some(file.display().to_string())
            }
            None => None,
        };
        Ok((exported, errors, output))
    }
}

impl ChurchService for Database {
    fn list_churches(&self, query: &ChurchQuery) -> ServiceResult<Page<Church>> {
        let needle = query.search.trim().to_lowercase();
        let mut matching: Vec<&Church> = self
            .churches
            .iter()
            .filter(|c| {
                if let Some(ref state) = query.state {
                    if !c.address.state.eq_ignore_ascii_case(state) {
                        return false;
                    }
                }
                if let Some(plan) = query.plan {
                    if c.plan != plan {
                        return false;
                    }
                }
                if let Some(status) = query.status {
                    if c.status != status {
                        return false;
                    }
                }
                if !needle.is_empty() {
                    let hay = [
                        Some(c.name.as_str()),
                        c.short_name.as_deref(),
                        Some(c.email.as_str()),
                        c.cnpj.as_deref(),
                        Some(c.address.city.as_str()),
                    ];
                    if !hay.iter().flatten().any(|h| h.to_lowercase().contains(&needle)) {
                        return false;
                    }
                }
                true
            })
            .collect();

        matching.sort_by(|a, b| {
            let ord = match query.sort {
                ChurchSortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                ChurchSortKey::City => a.address.city.to_lowercase().cmp(&b.address.city.to_lowercase()),
                ChurchSortKey::State => a.address.state.cmp(&b.address.state),
                ChurchSortKey::Plan => a.plan.cmp(&b.plan),
                ChurchSortKey::Status => format_church_status(a.status).cmp(format_church_status(b.status)),
                ChurchSortKey::Created => a.created_at_utc.cmp(&b.created_at_utc),
            };
            let ord = match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            ord.then(a.id.cmp(&b.id))
        });

        let count = matching.len();
        let page_size = query.page_size.max(1);
        let skip = query.page.saturating_sub(1) * page_size;
        let results = matching.into_iter().skip(skip).take(page_size).cloned().collect();
        debug!(page = query.page, count, "listed churches");
        Ok(Page { results, count })
    }

    fn get_church(&self, id: u64) -> ServiceResult<Church> {
        self.church(id).cloned().ok_or(ServiceError::NotFound { entity: "church", id })
    }

    fn create_church(&mut self, payload: ChurchPayload) -> ServiceResult<Church> {
        let before = self.clone();
        self.check_church_payload(&payload, None)?;
        let now = Utc::now().timestamp();
        let church = Church {
            id: self.next_church_id(),
            denomination_id: payload.denomination_id,
            name: payload.name.trim().to_string(),
            short_name: payload.short_name,
            cnpj: payload.cnpj,
            email: payload.email,
            phone: payload.phone,
            address: payload.address,
            plan: payload.plan,
            status: payload.status,
            logo: None,
            cover_image: None,
            created_at_utc: now,
            updated_at_utc: now,
        };
        self.churches.push(church.clone());
        self.commit(before)?;
        info!(id = church.id, name = %church.name, "church created");
        Ok(church)
    }

    fn update_church(&mut self, id: u64, payload: ChurchPayload) -> ServiceResult<Church> {
        let before = self.clone();
        self.check_church_payload(&payload, Some(id))?;
        let church = self.church_mut(id)?;
        church.denomination_id = payload.denomination_id;
        church.name = payload.name.trim().to_string();
        church.short_name = payload.short_name;
        church.cnpj = payload.cnpj;
        church.email = payload.email;
        church.phone = payload.phone;
        church.address = payload.address;
        church.plan = payload.plan;
        church.status = payload.status;
        church.updated_at_utc = Utc::now().timestamp();
        let church = church.clone();
        self.commit(before)?;
        info!(id, "church updated");
        Ok(church)
    }

    fn delete_church(&mut self, id: u64) -> ServiceResult<()> {
        let before = self.clone();
        if self.church(id).is_none() {
            return Err(ServiceError::NotFound { entity: "church", id });
        }
        let members = self.members.iter().filter(|m| m.church_id == id).count();
        if members > 0 {
            return Err(ServiceError::Invalid {
                field: "church",
                message: format!("Church #{} still has {} members", id, members),
            });
        }
        self.churches.retain(|c| c.id != id);
        self.branches.retain(|b| b.church_id != id);
        self.activities.retain(|a| a.church_id != id);
        self.visitors.retain(|v| v.church_id != id);
        self.commit(before)?;
        info!(id, "church deleted");
        Ok(())
    }

    fn batch(&mut self, action: BatchAction, ids: &[u64]) -> ServiceResult<BatchReport> {
        let before = self.clone();
        let mut report = BatchReport::default();
        if action == BatchAction::Export {
            let (exported, errors, output) = self.export_churches(ids)?;
            report.success_count = exported;
            report.error_count = errors.len();
            report.errors = errors;
            report.output = output;
            info!(exported, "churches exported");
            return Ok(report);
        }
        for &id in ids {
            let outcome = match action {
                BatchAction::Activate | BatchAction::Deactivate => {
                    let status = if action == BatchAction::Activate {
                        ChurchStatus::Active
                    } else {
                        ChurchStatus::Inactive
                    };
                    self.church_mut(id).map(|c| {
                        c.status = status;
                        c.updated_at_utc = Utc::now().timestamp();
                    })
                }
                BatchAction::Delete => self.delete_church(id),
                BatchAction::Export => unreachable!("export handled above"),
            };
            match outcome {
                Ok(()) => report.success_count += 1,
                Err(e) => {
                    report.error_count += 1;
                    report.errors.push(e.to_string());
                }
            }
        }
        self.commit(before)?;
        info!(?action, ok = report.success_count, failed = report.error_count, "batch action applied");
        Ok(report)
    }

    fn upload_asset(&mut self, church_id: u64, kind: AssetKind, file: &Path) -> ServiceResult<()> {
        let before = self.clone();
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .filter(|e| ASSET_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| ServiceError::Asset(format!("Unsupported image type: {}", file.display())))?;
        let size = fs::metadata(file)?.len();
        if size > MAX_ASSET_BYTES {
            return Err(ServiceError::Asset(format!("Image is larger than {} MiB", MAX_ASSET_BYTES / 1024 / 1024)));
        }
        let dir = self
            .data_dir()
            .ok_or_else(|| ServiceError::Asset("Assets need a data directory".to_string()))?
            .join("assets")
            .join(format!("church-{}", church_id));
        self.get_church(church_id)?;
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}.{}", asset_stem(kind), ext));
        let previous = self.church(church_id).and_then(|c| asset_slot(c, kind).clone());
        fs::copy(file, &target)?;
        if let Some(previous) = previous {
            let previous = PathBuf::from(previous);
            if previous != target {
                if let Err(e) = fs::remove_file(&previous) {
                    warn!(path = %previous.display(), error = %e, "could not remove replaced asset");
                }
            }
        }
        let church = self.church_mut(church_id)?;
        let stored = Some(target.display().to_string());
        match kind {
            AssetKind::Logo => church.logo = stored,
            AssetKind::Cover => church.cover_image = stored,
        }
        church.updated_at_utc = Utc::now().timestamp();
        self.commit(before)?;
        info!(church_id, ?kind, "asset uploaded");
        Ok(())
    }

    fn remove_asset(&mut self, church_id: u64, kind: AssetKind) -> ServiceResult<()> {
        let before = self.clone();
        let church = self.church_mut(church_id)?;
        let slot = match kind {
            AssetKind::Logo => &mut church.logo,
            AssetKind::Cover => &mut church.cover_image,
        };
        let path = slot
            .take()
            .ok_or_else(|| ServiceError::Asset(format!("Church has no {}", asset_stem(kind))))?;
        church.updated_at_utc = Utc::now().timestamp();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                *self = before;
                return Err(e.into());
            }
        }
        self.commit(before)?;
        info!(church_id, ?kind, "asset removed");
        Ok(())
    }

    fn church_statistics(&self, church_id: u64) -> ServiceResult<ChurchStatistics> {
        self.get_church(church_id)?;
        let mut stats = ChurchStatistics::default();
        for m in self.members.iter().filter(|m| m.church_id == church_id) {
            stats.members_total += 1;
            *stats.members_by_status.entry(m.membership_status).or_insert(0) += 1;
        }
        for v in self.visitors.iter().filter(|v| v.church_id == church_id) {
            stats.visitors_total += 1;
            if v.converted_member_id.is_some() {
                stats.visitors_converted += 1;
            }
        }
        stats.activities_total = self.activities.iter().filter(|a| a.church_id == church_id).count();
        stats.branches_total = self.branches.iter().filter(|b| b.church_id == church_id).count();
        Ok(stats)
    }

    fn list_branches(&self, church_id: u64) -> ServiceResult<Vec<Branch>> {
        self.get_church(church_id)?;
        Ok(self.branches.iter().filter(|b| b.church_id == church_id).cloned().collect())
    }

    fn create_branch(&mut self, church_id: u64, name: &str, address: Address) -> ServiceResult<Branch> {
        let before = self.clone();
        self.get_church(church_id)?;
        if name.trim().is_empty() {
            return Err(ServiceError::Invalid { field: "name", message: "Branch name is required".to_string() });
        }
        let branch = Branch {
            id: self.branches.iter().map(|b| b.id).max().unwrap_or(0) + 1,
            church_id,
            name: name.trim().to_string(),
            address,
            pastor_member_id: None,
            is_active: true,
            created_at_utc: Utc::now().timestamp(),
        };
        self.branches.push(branch.clone());
        self.commit(before)?;
        info!(id = branch.id, church_id, "branch created");
        Ok(branch)
    }

    fn list_admins(&self, church_id: u64) -> ServiceResult<Vec<ChurchAdmin>> {
        self.get_church(church_id)?;
        Ok(self
            .members
            .iter()
            .filter(|m| m.church_id == church_id)
            .filter_map(|m| {
                Some(ChurchAdmin {
                    user_id: m.user_id?,
                    church_id,
                    full_name: m.full_name.clone(),
                    email: m.user_email.clone().or_else(|| m.email.clone()).unwrap_or_default(),
                    role: m.system_role?,
                })
            })
            .collect())
    }

    fn list_activities(&self, church_id: u64) -> ServiceResult<Vec<Activity>> {
        self.get_church(church_id)?;
        let mut activities: Vec<Activity> = self.activities.iter().filter(|a| a.church_id == church_id).cloned().collect();
        activities.sort_by_key(|a| (a.starts_at, a.id));
        Ok(activities)
    }

    fn create_activity(&mut self, payload: ActivityPayload) -> ServiceResult<Activity> {
        let before = self.clone();
        self.get_church(payload.church_id)?;
        if payload.ends_at < payload.starts_at {
            return Err(ServiceError::Invalid { field: "ends_at", message: "End must be after start".to_string() });
        }
        let activity = Activity {
            id: self.activities.iter().map(|a| a.id).max().unwrap_or(0) + 1,
            church_id: payload.church_id,
            branch_id: payload.branch_id,
            name: payload.name,
            description: payload.description,
            starts_at: payload.starts_at,
            ends_at: payload.ends_at,
            location: payload.location,
            is_recurring: payload.is_recurring,
            recurrence: payload.recurrence,
            recurrence_end: payload.recurrence_end,
            max_participants: payload.max_participants,
            created_at_utc: Utc::now().timestamp(),
        };
        self.activities.push(activity.clone());
        self.commit(before)?;
        info!(id = activity.id, church_id = activity.church_id, "activity created");
        Ok(activity)
    }

    fn cnpj_in_use(&self, cnpj: &str, exclude: Option<u64>) -> ServiceResult<bool> {
        let digits = digits_only(cnpj);
        if digits.is_empty() {
            return Ok(false);
        }
        Ok(self
            .churches
            .iter()
            .any(|c| Some(c.id) != exclude && c.cnpj.as_deref().map(digits_only).as_deref() == Some(digits.as_str())))
    }

    fn church_email_in_use(&self, email: &str, exclude: Option<u64>) -> ServiceResult<bool> {
        Ok(self
            .churches
            .iter()
            .any(|c| Some(c.id) != exclude && c.email.eq_ignore_ascii_case(email.trim())))
    }
}

impl MemberService for Database {
    fn list_members(&self, query: &MemberQuery) -> ServiceResult<Page<Member>> {
        let needle = query.search.trim().to_lowercase();
        let mut matching: Vec<&Member> = self
            .members
            .iter()
            .filter(|m| query.church_id.map_or(true, |c| m.church_id == c))
            .filter(|m| query.branch_id.map_or(true, |b| m.branch_id == Some(b)))
            .filter(|m| query.status.map_or(true, |s| m.membership_status == s))
            .filter(|m| {
                needle.is_empty()
                    || m.full_name.to_lowercase().contains(&needle)
                    || m.email.as_deref().map_or(false, |e| e.to_lowercase().contains(&needle))
            })
            .collect();
        matching.sort_by(|a, b| a.full_name.to_lowercase().cmp(&b.full_name.to_lowercase()).then(a.id.cmp(&b.id)));
        let count = matching.len();
        let page_size = query.page_size.max(1);
        let skip = query.page.saturating_sub(1) * page_size;
        Ok(Page {
            results: matching.into_iter().skip(skip).take(page_size).cloned().collect(),
            count,
        })
    }

    fn get_member(&self, id: u64) -> ServiceResult<Member> {
        self.member(id).cloned().ok_or(ServiceError::NotFound { entity: "member", id })
    }

    fn create_member(&mut self, payload: MemberPayload, actor: &str) -> ServiceResult<Member> {
        let before = self.clone();
        self.check_member_payload(&payload, None)?;
        let now = Utc::now().timestamp();
        let id = self.next_member_id();
        let member = Member {
            id,
            church_id: payload.church_id,
            branch_id: payload.branch_id,
            full_name: payload.full_name.trim().to_string(),
            cpf: payload.cpf,
            birth_date: payload.birth_date,
            gender: payload.gender,
            email: payload.email,
            phone: payload.phone,
            address: payload.address,
            marital_status: payload.marital_status,
            spouse_id: payload.spouse_id,
            children_ids: payload.children_ids,
            children_count: payload.children_count,
            membership_status: payload.membership_status,
            ministerial_function: payload.ministerial_function,
            membership_date: payload.membership_date,
            user_id: None,
            user_email: None,
            system_role: None,
            created_at_utc: now,
            updated_at_utc: now,
        };
        self.members.push(member);
        let idx = self.members.len() - 1;
        if let Some(access) = payload.access.as_ref() {
            self.apply_access(idx, access);
        }
        self.record_status(id, None, payload.membership_status, actor, payload.status_change_reason);
        self.record_function(id, None, payload.ministerial_function, actor, payload.function_change_reason);
        self.commit(before)?;
        info!(id, actor, "member created");
        Ok(self.members[idx].clone())
    }

    fn update_member(&mut self, id: u64, payload: MemberPayload, actor: &str) -> ServiceResult<Member> {
        let before = self.clone();
        self.check_member_payload(&payload, Some(id))?;
        let idx = self
            .members
            .iter()
            .position(|m| m.id == id)
            .ok_or(ServiceError::NotFound { entity: "member", id })?;
        let old_status = self.members[idx].membership_status;
        let old_function = self.members[idx].ministerial_function;
        if old_status != payload.membership_status {
            self.record_status(id, Some(old_status), payload.membership_status, actor, payload.status_change_reason.clone());
        }
        if old_function != payload.ministerial_function {
            self.record_function(id, Some(old_function), payload.ministerial_function, actor, payload.function_change_reason.clone());
        }
        {
            let m = &mut self.members[idx];
            m.church_id = payload.church_id;
            m.branch_id = payload.branch_id;
            m.full_name = payload.full_name.trim().to_string();
            m.cpf = payload.cpf;
            m.birth_date = payload.birth_date;
            m.gender = payload.gender;
            m.email = payload.email;
            m.phone = payload.phone;
            m.address = payload.address;
            m.marital_status = payload.marital_status;
            m.spouse_id = payload.spouse_id;
            m.children_ids = payload.children_ids;
            m.children_count = payload.children_count;
            m.membership_status = payload.membership_status;
            m.ministerial_function = payload.ministerial_function;
            m.membership_date = payload.membership_date;
            m.updated_at_utc = Utc::now().timestamp();
        }
        if let Some(access) = payload.access.as_ref() {
            self.apply_access(idx, access);
        }
        self.commit(before)?;
        info!(id, actor, "member updated");
        Ok(self.members[idx].clone())
    }

    fn delete_member(&mut self, id: u64) -> ServiceResult<()> {
        let before = self.clone();
        if self.member(id).is_none() {
            return Err(ServiceError::NotFound { entity: "member", id });
        }
        self.members.retain(|m| m.id != id);
        for m in self.members.iter_mut() {
            if m.spouse_id == Some(id) {
                m.spouse_id = None;
            }
            m.children_ids.retain(|&c| c != id);
        }
        self.status_log.retain(|e| e.member_id != id);
        self.function_history.retain(|e| e.member_id != id);
        self.commit(before)?;
        info!(id, "member deleted");
        Ok(())
    }

    fn search_members(&self, church_id: u64, text: &str, exclude: Option<u64>) -> ServiceResult<Vec<Member>> {
        let needle = text.trim().to_lowercase();
        Ok(self
            .members
            .iter()
            .filter(|m| m.church_id == church_id && Some(m.id) != exclude)
            .filter(|m| needle.is_empty() || m.full_name.to_lowercase().contains(&needle))
            .take(20)
            .cloned()
            .collect())
    }

    fn email_in_use(&self, email: &str, exclude: Option<u64>) -> ServiceResult<bool> {
        let email = email.trim();
        if email.is_empty() {
            return Ok(false);
        }
        Ok(self.members.iter().any(|m| {
            Some(m.id) != exclude
                && (m.email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(email))
                    || m.user_email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(email)))
        }))
    }
}

impl HistoryService for Database {
    fn function_history(&self, member_id: u64) -> ServiceResult<Vec<FunctionHistoryEntry>> {
        self.get_member(member_id)?;
        Ok(self.function_history.iter().filter(|e| e.member_id == member_id).cloned().collect())
    }

    fn status_log(&self, member_id: u64) -> ServiceResult<MembershipStatusLog> {
        let member = self.get_member(member_id)?;
        Ok(MembershipStatusLog {
            history: self.status_log.iter().filter(|e| e.member_id == member_id).cloned().collect(),
            current_status: member.membership_status,
            current_status_display: format_membership_status(member.membership_status).to_string(),
        })
    }
}

fn asset_stem(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Logo => "logo",
        AssetKind::Cover => "cover",
    }
}

fn asset_slot(church: &Church, kind: AssetKind) -> &Option<String> {
    match kind {
        AssetKind::Logo => &church.logo,
        AssetKind::Cover => &church.cover_image,
    }
}

/// Quote a CSV field when it contains separators or quotes.
pub fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Strip everything but ASCII digits.
pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn format_membership_status(s: MembershipStatus) -> &'static str {
    match s {
        MembershipStatus::Active => "Active",
        MembershipStatus::Inactive => "Inactive",
        MembershipStatus::Disciplined => "Disciplined",
        MembershipStatus::Transferred => "Transferred",
        MembershipStatus::Excluded => "Excluded",
        MembershipStatus::Deceased => "Deceased",
    }
}

pub fn format_function(f: MinisterialFunction) -> &'static str {
    match f {
        MinisterialFunction::Member => "Member",
        MinisterialFunction::Leader => "Leader",
        MinisterialFunction::Missionary => "Missionary",
        MinisterialFunction::Evangelist => "Evangelist",
        MinisterialFunction::Deacon => "Deacon",
        MinisterialFunction::Deaconess => "Deaconess",
        MinisterialFunction::Elder => "Elder",
        MinisterialFunction::Pastor => "Pastor",
    }
}

pub fn format_marital_status(s: MaritalStatus) -> &'static str {
    match s {
        MaritalStatus::Single => "Single",
        MaritalStatus::Married => "Married",
        MaritalStatus::Divorced => "Divorced",
        MaritalStatus::Widowed => "Widowed",
    }
}

pub fn format_gender(g: Option<Gender>) -> &'static str {
    match g {
        Some(Gender::Male) => "Male",
        Some(Gender::Female) => "Female",
        None => "-",
    }
}

pub fn format_role(r: SystemRole) -> &'static str {
    match r {
        SystemRole::DenominationAdmin => "Denomination Admin",
        SystemRole::ChurchAdmin => "Church Admin",
        SystemRole::Pastor => "Pastor",
        SystemRole::Secretary => "Secretary",
        SystemRole::Leader => "Leader",
        SystemRole::ReadOnly => "Read Only",
    }
}

pub fn format_plan(p: Plan) -> &'static str {
    match p {
        Plan::Free => "Free",
        Plan::Basic => "Basic",
        Plan::Professional => "Professional",
        Plan::Enterprise => "Enterprise",
    }
}

pub fn format_church_status(s: ChurchStatus) -> &'static str {
    match s {
        ChurchStatus::Active => "Active",
        ChurchStatus::Inactive => "Inactive",
        ChurchStatus::Suspended => "Suspended",
    }
}

pub fn format_recurrence(r: Option<Recurrence>) -> &'static str {
    match r {
        Some(Recurrence::Daily) => "Daily",
        Some(Recurrence::Weekly) => "Weekly",
        Some(Recurrence::Biweekly) => "Every 2 weeks",
        Some(Recurrence::Monthly) => "Monthly",
        None => "-",
    }
}

pub fn format_asset_kind(k: AssetKind) -> &'static str {
    match k {
        AssetKind::Logo => "logo",
        AssetKind::Cover => "cover image",
    }
}

/// One-line address, skipping empty parts.
pub fn format_address(a: &Address) -> String {
    let street = [a.street.as_str(), a.number.as_str(), a.complement.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let city = match (a.city.is_empty(), a.state.is_empty()) {
        (false, false) => format!("{}/{}", a.city, a.state),
        (false, true) => a.city.clone(),
        (true, false) => a.state.clone(),
        (true, true) => String::new(),
    };
    let parts: Vec<String> = [street, a.neighborhood.clone(), city, a.zip_code.clone()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print churches as an aligned table on stdout.
pub fn print_church_table(churches: &[Church]) {
    println!(
        "{:<4} {:<32} {:<18} {:<3} {:<13} {:<10}",
        "ID", "Name", "City", "UF", "Plan", "Status"
    );
    println!("{}", "-".repeat(86));
    for c in churches {
        println!(
            "{:<4} {:<32} {:<18} {:<3} {:<13} {:<10}",
            c.id,
            truncate(&c.name, 32),
            truncate(&c.address.city, 18),
            c.address.state,
            format_plan(c.plan),
            format_church_status(c.status)
        );
    }
}

/// Print members as an aligned table on stdout.
pub fn print_member_table(members: &[Member]) {
    println!(
        "{:<4} {:<30} {:<12} {:<11} {:<28}",
        "ID", "Name", "Status", "Function", "Email"
    );
    println!("{}", "-".repeat(88));
    for m in members {
        println!(
            "{:<4} {:<30} {:<12} {:<11} {:<28}",
            m.id,
            truncate(&m.full_name, 30),
            format_membership_status(m.membership_status),
            format_function(m.ministerial_function),
            truncate(m.email.as_deref().unwrap_or("-"), 28)
        );
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    if width <= 1 {
        return "…".to_string();
    }
    let mut out: String = s.chars().take(width - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn church_payload(name: &str, email: &str) -> ChurchPayload {
        ChurchPayload {
            denomination_id: None,
            name: name.to_string(),
            short_name: None,
            cnpj: None,
            email: email.to_string(),
            phone: None,
            address: Address { city: "São Paulo".to_string(), state: "SP".to_string(), ..Address::default() },
            plan: Plan::Basic,
            status: ChurchStatus::Active,
        }
    }

    pub(crate) fn member_payload(church_id: u64, name: &str) -> MemberPayload {
        MemberPayload {
            church_id,
            branch_id: None,
            full_name: name.to_string(),
            cpf: None,
            birth_date: None,
            gender: None,
            email: None,
            phone: None,
            address: Address::default(),
            marital_status: MaritalStatus::Single,
            spouse_id: None,
            children_ids: vec![],
            children_count: None,
            membership_status: MembershipStatus::Active,
            ministerial_function: MinisterialFunction::Member,
            membership_date: None,
            status_change_reason: None,
            function_change_reason: None,
            access: None,
        }
    }

    #[test]
    fn test_list_churches_filters_sorts_and_pages() {
        let mut db = Database::in_memory();
        for (i, name) in ["Zion", "Betel", "Agape", "Canaã", "Monte Sião"].iter().enumerate() {
            let mut p = church_payload(name, &format!("c{}@x.org", i));
            if i % 2 == 0 {
                p.plan = Plan::Enterprise;
            }
            db.create_church(p).unwrap();
        }
        let query = ChurchQuery { page_size: 2, ..ChurchQuery::default() };
        let page = db.list_churches(&query).unwrap();
        assert_eq!(page.count, 5);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].name, "Agape");
        assert_eq!(page.results[1].name, "Betel");

        let query = ChurchQuery { plan: Some(Plan::Enterprise), direction: SortDirection::Desc, ..ChurchQuery::default() };
        let page = db.list_churches(&query).unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results[0].name, "Zion");

        let query = ChurchQuery { search: "sião".to_string(), ..ChurchQuery::default() };
        assert_eq!(db.list_churches(&query).unwrap().count, 1);
    }

    #[test]
    fn test_failed_save_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("missing");
        let path = data_dir.join("chm.json");
        let mut db = Database::load(&path);

        let err = db.create_church(church_payload("Betel", "b@x.org")).unwrap_err();
        assert!(matches!(err, ServiceError::Io(_)));
        assert!(db.churches.is_empty());

        // Same email again: still the write error, not a duplicate.
        let err = db.create_church(church_payload("Betel", "b@x.org")).unwrap_err();
        assert!(matches!(err, ServiceError::Io(_)));

        fs::create_dir_all(&data_dir).unwrap();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        assert_eq!(church.id, 1);
        assert_eq!(Database::load(&path).churches.len(), 1);
    }

    #[test]
    fn test_failed_save_rolls_back_member_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chm.json");
        let mut db = Database::load(&path);
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let member = db.create_member(member_payload(church.id, "Ana"), "admin").unwrap();
        let history = db.status_log.len();

        // A directory where the temp file should go makes the write fail.
        fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let mut payload = member_payload(church.id, "Ana");
        payload.membership_status = MembershipStatus::Inactive;
        assert!(db.update_member(member.id, payload, "admin").is_err());
        assert_eq!(db.status_log.len(), history);
        assert_eq!(db.get_member(member.id).unwrap().membership_status, MembershipStatus::Active);
    }

    #[test]
    fn test_duplicate_church_email_is_conflict() {
        let mut db = Database::in_memory();
        db.create_church(church_payload("Betel", "a@x.org")).unwrap();
        let err = db.create_church(church_payload("Outra", "A@X.org")).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { field: "email", .. }));
    }

    #[test]
    fn test_batch_reports_per_item_errors() {
        let mut db = Database::in_memory();
        let a = db.create_church(church_payload("A", "a@x.org")).unwrap();
        let b = db.create_church(church_payload("B", "b@x.org")).unwrap();
        db.create_member(member_payload(b.id, "Maria"), "admin").unwrap();

        let report = db.batch(BatchAction::Deactivate, &[a.id, 99]).unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 1);
        assert_eq!(db.church(a.id).unwrap().status, ChurchStatus::Inactive);

        let report = db.batch(BatchAction::Delete, &[a.id, b.id]).unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.error_count, 1);
        assert!(db.church(b.id).is_some());
    }

    #[test]
    fn test_status_change_is_logged_with_reason() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let member = db.create_member(member_payload(church.id, "João"), "admin").unwrap();

        let mut update = member_payload(church.id, "João");
        update.membership_status = MembershipStatus::Transferred;
        update.status_change_reason = Some("Moved to Recife".to_string());
        db.update_member(member.id, update, "secretaria").unwrap();

        let log = db.status_log(member.id).unwrap();
        assert_eq!(log.current_status, MembershipStatus::Transferred);
        assert_eq!(log.history.len(), 2);
        let last = log.history.last().unwrap();
        assert_eq!(last.old_value, Some(MembershipStatus::Active));
        assert_eq!(last.reason.as_deref(), Some("Moved to Recife"));
        assert_eq!(last.changed_by, "secretaria");
        assert_eq!(db.function_history(member.id).unwrap().len(), 1);
    }

    #[test]
    fn test_access_assigns_user_once() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut payload = member_payload(church.id, "Ana");
        payload.access = Some(SystemAccess {
            create_system_user: true,
            system_role: Some(SystemRole::Secretary),
            user_email: Some("ana@x.org".to_string()),
        });
        let member = db.create_member(payload.clone(), "admin").unwrap();
        assert_eq!(member.user_id, Some(1));
        let admins = db.list_admins(church.id).unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].role, SystemRole::Secretary);

        let updated = db.update_member(member.id, payload, "admin").unwrap();
        assert_eq!(updated.user_id, Some(1));
        assert!(db.email_in_use("ANA@x.org", None).unwrap());
        assert!(!db.email_in_use("ana@x.org", Some(member.id)).unwrap());
    }

    #[test]
    fn test_convert_visitor_creates_member_once() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let today = Local::now().date_naive();
        let visitor = db.add_visitor(church.id, "Pedro", None, None, today).unwrap();
        let member = db.convert_visitor(visitor.id, "admin").unwrap();
        assert_eq!(member.full_name, "Pedro");
        assert!(db.convert_visitor(visitor.id, "admin").is_err());
        let stats = db.church_statistics(church.id).unwrap();
        assert_eq!(stats.visitors_converted, 1);
        assert_eq!(stats.members_total, 1);
    }

    #[test]
    fn test_assets_and_export_use_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("church_admin.json");
        let mut db = Database::load(&data);
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();

        let logo = dir.path().join("logo.PNG");
        fs::write(&logo, b"png").unwrap();
        db.upload_asset(church.id, AssetKind::Logo, &logo).unwrap();
        let stored = db.church(church.id).unwrap().logo.clone().unwrap();
        assert!(Path::new(&stored).exists());

        let text = dir.path().join("notes.txt");
        fs::write(&text, b"x").unwrap();
        assert!(matches!(db.upload_asset(church.id, AssetKind::Cover, &text), Err(ServiceError::Asset(_))));

        db.remove_asset(church.id, AssetKind::Logo).unwrap();
        assert!(!Path::new(&stored).exists());
        assert!(db.remove_asset(church.id, AssetKind::Logo).is_err());

        let report = db.batch(BatchAction::Export, &[church.id]).unwrap();
        assert_eq!(report.success_count, 1);
        let csv = fs::read_to_string(report.output.unwrap()).unwrap();
        assert!(csv.contains("Betel"));

        let reloaded = Database::load(&data);
        assert_eq!(reloaded.churches.len(), 1);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Igreja Batista", 6), "Igrej…");
        assert_eq!(truncate("Betel", 10), "Betel");
    }

    #[test]
    fn test_format_address_skips_empty_parts() {
        let a = Address {
            street: "Rua das Flores".into(),
            number: "12".into(),
            city: "Recife".into(),
            state: "PE".into(),
            ..Address::default()
        };
        assert_eq!(format_address(&a), "Rua das Flores 12, Recife/PE");
        assert_eq!(format_address(&Address::default()), "-");
    }
}
