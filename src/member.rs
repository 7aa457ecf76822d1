//! Member data structures and history records.
//!
//! Besides the `Member` record itself this module defines the payload submitted by
//! the member form and the read-only history entries kept for membership status
//! and ministerial function changes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::church::Address;
use crate::fields::*;

/// A church member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub church_id: u64,
    pub branch_id: Option<u64>,
    pub full_name: String,
    pub cpf: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    pub marital_status: MaritalStatus,
    pub spouse_id: Option<u64>,
    #[serde(default)]
    pub children_ids: Vec<u64>,
    pub children_count: Option<u32>,
    pub membership_status: MembershipStatus,
    pub ministerial_function: MinisterialFunction,
    pub membership_date: Option<NaiveDate>,
    /// Linked system user, when the member has access to the tool.
    pub user_id: Option<u64>,
    pub user_email: Option<String>,
    pub system_role: Option<SystemRole>,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

impl Member {
    /// Age in whole years on the given date.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let birth = self.birth_date?;
        today.years_since(birth)
    }
}

/// A child selected in the member form, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub id: u64,
    pub full_name: String,
    pub age: Option<u32>,
}

/// System access block of a member payload.
///
/// Absent from the payload entirely when the actor edits their own record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAccess {
    pub create_system_user: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub system_role: Option<SystemRole>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_email: Option<String>,
}

/// Normalised member data sent to the member service on create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPayload {
    pub church_id: u64,
    pub branch_id: Option<u64>,
    pub full_name: String,
    pub cpf: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Address,
    pub marital_status: MaritalStatus,
    pub spouse_id: Option<u64>,
    pub children_ids: Vec<u64>,
    pub children_count: Option<u32>,
    pub membership_status: MembershipStatus,
    pub ministerial_function: MinisterialFunction,
    pub membership_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_change_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_change_reason: Option<String>,
    #[serde(flatten)]
    pub access: Option<SystemAccess>,
}

/// One recorded membership status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub member_id: u64,
    pub old_value: Option<MembershipStatus>,
    pub new_value: MembershipStatus,
    pub old_display: String,
    pub new_display: String,
    pub changed_at_utc: i64,
    pub changed_by: String,
    pub reason: Option<String>,
}

/// One recorded ministerial function transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionHistoryEntry {
    pub member_id: u64,
    pub old_value: Option<MinisterialFunction>,
    pub new_value: MinisterialFunction,
    pub old_display: String,
    pub new_display: String,
    pub changed_at_utc: i64,
    pub changed_by: String,
    pub reason: Option<String>,
}

/// Status log response: entries plus the member's current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipStatusLog {
    pub history: Vec<StatusLogEntry>,
    pub current_status: MembershipStatus,
    pub current_status_display: String,
}

/// A visitor who attended a church and may later become a member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    pub id: u64,
    pub church_id: u64,
    pub branch_id: Option<u64>,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub first_visit: NaiveDate,
    pub converted_member_id: Option<u64>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(access: Option<SystemAccess>) -> MemberPayload {
        MemberPayload {
            church_id: 1,
            branch_id: None,
            full_name: "Ana Souza".to_string(),
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
            access,
        }
    }

    #[test]
    fn test_unchecked_access_omits_role_and_email() {
        let json = serde_json::to_value(payload(Some(SystemAccess {
            create_system_user: false,
            system_role: None,
            user_email: None,
        })))
        .unwrap();
        assert_eq!(json["create_system_user"], serde_json::json!(false));
        assert!(json.get("system_role").is_none());
        assert!(json.get("user_email").is_none());
    }

    #[test]
    fn test_checked_access_is_flattened() {
        let json = serde_json::to_value(payload(Some(SystemAccess {
            create_system_user: true,
            system_role: Some(SystemRole::Secretary),
            user_email: Some("a@b.com".to_string()),
        })))
        .unwrap();
        assert_eq!(json["create_system_user"], serde_json::json!(true));
        assert_eq!(json["system_role"], serde_json::json!("secretary"));
        assert_eq!(json["user_email"], serde_json::json!("a@b.com"));
    }

    #[test]
    fn test_self_edit_payload_has_no_access_keys() {
        let json = serde_json::to_value(payload(None)).unwrap();
        assert!(json.get("create_system_user").is_none());
        assert!(json.get("system_role").is_none());
    }
}
