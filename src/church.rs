//! Church, denomination and branch data structures.
//!
//! A denomination groups churches; each church owns any number of branches
//! (congregations). Churches carry their subscription plan, status and optional
//! logo and cover images.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fields::*;

/// Postal address shared by churches, branches and members.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub complement: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Denomination {
    pub id: u64,
    pub name: String,
    pub abbreviation: Option<String>,
    pub headquarters_city: Option<String>,
    pub created_at_utc: i64,
}

/// A church registered under a denomination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Church {
    pub id: u64,
    pub denomination_id: Option<u64>,
    pub name: String,
    pub short_name: Option<String>,
    pub cnpj: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    pub plan: Plan,
    pub status: ChurchStatus,
    pub logo: Option<String>,
    pub cover_image: Option<String>,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

/// Fields accepted when creating or updating a church.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChurchPayload {
    pub denomination_id: Option<u64>,
    pub name: String,
    pub short_name: Option<String>,
    pub cnpj: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub address: Address,
    pub plan: Plan,
    pub status: ChurchStatus,
}

/// A congregation belonging to a church.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: u64,
    pub church_id: u64,
    pub name: String,
    #[serde(default)]
    pub address: Address,
    pub pastor_member_id: Option<u64>,
    pub is_active: bool,
    pub created_at_utc: i64,
}

/// A system user with administrative rights over a church.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChurchAdmin {
    pub user_id: u64,
    pub church_id: u64,
    pub full_name: String,
    pub email: String,
    pub role: SystemRole,
}

/// Aggregate counters shown on the statistics tab of a church.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChurchStatistics {
    pub members_total: usize,
    pub members_by_status: BTreeMap<MembershipStatus, usize>,
    pub visitors_total: usize,
    pub visitors_converted: usize,
    pub activities_total: usize,
    pub branches_total: usize,
}
