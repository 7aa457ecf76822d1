//! Activity data structure.
//!
//! Activities are scheduled church events (services, meetings, classes) that may
//! repeat on a fixed pattern until an end date.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::fields::Recurrence;

/// A scheduled church activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub church_id: u64,
    pub branch_id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub location: Option<String>,
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
    pub recurrence_end: Option<NaiveDate>,
    pub max_participants: Option<u32>,
    pub created_at_utc: i64,
}

/// Fields accepted when creating or updating an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub church_id: u64,
    pub branch_id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub location: Option<String>,
    pub is_recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_end: Option<NaiveDate>,
    pub max_participants: Option<u32>,
}
