//! Enumerations and field types for church administration.
//!
//! This module defines the structured values used to categorise members, churches
//! and activities, including membership status, ministerial function, system roles,
//! subscription plans and the sort/filter keys used by list views.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Standing of a member within the church.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Disciplined,
    Transferred,
    Excluded,
    Deceased,
}

/// Ministerial function held by a member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MinisterialFunction {
    Member,
    Leader,
    Missionary,
    Evangelist,
    Deacon,
    Deaconess,
    Elder,
    Pastor,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaritalStatus {
    Single,
    Married,
    Divorced,
    Widowed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// Access level of a system user. Ordered from most to least privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    DenominationAdmin,
    ChurchAdmin,
    Pastor,
    Secretary,
    Leader,
    ReadOnly,
}

impl SystemRole {
    /// Numeric rank, lower is more privileged.
    pub fn rank(self) -> u8 {
        match self {
            SystemRole::DenominationAdmin => 0,
            SystemRole::ChurchAdmin => 1,
            SystemRole::Pastor => 2,
            SystemRole::Secretary => 3,
            SystemRole::Leader => 4,
            SystemRole::ReadOnly => 5,
        }
    }

    pub fn all() -> [SystemRole; 6] {
        [
            SystemRole::DenominationAdmin,
            SystemRole::ChurchAdmin,
            SystemRole::Pastor,
            SystemRole::Secretary,
            SystemRole::Leader,
            SystemRole::ReadOnly,
        ]
    }
}

/// Operational status of a church account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChurchStatus {
    Active,
    Inactive,
    Suspended,
}

/// Subscription plan of a church.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Basic,
    Professional,
    Enterprise,
}

/// Repetition pattern for recurring activities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

/// Operations that can be applied to a selection of churches at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Activate,
    Deactivate,
    Delete,
    Export,
}

/// Image slots a church can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Logo,
    Cover,
}

/// Sortable columns of the church management list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChurchSortKey {
    Name,
    City,
    State,
    Plan,
    Status,
    Created,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}
