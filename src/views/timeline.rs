//! Membership status and ministerial function timelines for one member.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::service::HistoryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Status,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub from: Option<String>,
    pub to: String,
    pub at_utc: i64,
    pub by: String,
    pub reason: Option<String>,
}

impl TimelineEntry {
    pub fn when(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.at_utc, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }

    /// "Active → Transferred" or just the initial value.
    pub fn transition(&self) -> String {
        match &self.from {
            Some(from) => format!("{} → {}", from, self.to),
            None => self.to.clone(),
        }
    }
}

/// Both histories, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberTimeline {
    pub status: Vec<TimelineEntry>,
    pub function: Vec<TimelineEntry>,
    pub current_status: Option<String>,
}

fn newest_first(mut entries: Vec<TimelineEntry>) -> Vec<TimelineEntry> {
    entries.reverse();
    entries.sort_by(|a, b| b.at_utc.cmp(&a.at_utc));
    entries
}

impl MemberTimeline {
    /// Load both histories. A failed fetch leaves that history empty.
    pub fn load(member_id: u64, history: &dyn HistoryService) -> Self {
        let mut timeline = MemberTimeline::default();
        match history.status_log(member_id) {
            Ok(log) => {
                timeline.current_status = Some(log.current_status_display);
                timeline.status = newest_first(
                    log.history
                        .into_iter()
                        .map(|e| TimelineEntry {
                            kind: TimelineKind::Status,
                            from: e.old_value.map(|_| e.old_display),
                            to: e.new_display,
                            at_utc: e.changed_at_utc,
                            by: e.changed_by,
                            reason: e.reason,
                        })
                        .collect(),
                );
            }
            Err(e) => warn!(member_id, error = %e, "status history unavailable"),
        }
        match history.function_history(member_id) {
            Ok(entries) => {
                timeline.function = newest_first(
                    entries
                        .into_iter()
                        .map(|e| TimelineEntry {
                            kind: TimelineKind::Function,
                            from: e.old_value.map(|_| e.old_display),
                            to: e.new_display,
                            at_utc: e.changed_at_utc,
                            by: e.changed_by,
                            reason: e.reason,
                        })
                        .collect(),
                );
            }
            Err(e) => warn!(member_id, error = %e, "function history unavailable"),
        }
        timeline
    }

    /// Both timelines interleaved, newest first.
    pub fn merged(&self) -> Vec<&TimelineEntry> {
        let mut all: Vec<&TimelineEntry> = self.status.iter().chain(self.function.iter()).collect();
        all.sort_by(|a, b| b.at_utc.cmp(&a.at_utc));
        all
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty() && self.function.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{church_payload, member_payload};
    use crate::db::Database;
    use crate::fields::{MembershipStatus, MinisterialFunction};
    use crate::service::{ChurchService, MemberService};

    #[test]
    fn test_newest_first_with_initial_entry() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let member = db.create_member(member_payload(church.id, "Ana"), "admin").unwrap();
        let mut update = member_payload(church.id, "Ana");
        update.membership_status = MembershipStatus::Transferred;
        update.status_change_reason = Some("Moved to Recife".to_string());
        update.ministerial_function = MinisterialFunction::Deacon;
        db.update_member(member.id, update, "secretary").unwrap();

        let timeline = MemberTimeline::load(member.id, &db);
        assert_eq!(timeline.status.len(), 2);
        assert_eq!(timeline.status[0].transition(), "Active → Transferred");
        assert_eq!(timeline.status[0].reason.as_deref(), Some("Moved to Recife"));
        assert_eq!(timeline.status[1].from, None);
        assert_eq!(timeline.function[0].to, "Deacon");
        assert_eq!(timeline.merged().len(), 4);
        assert_eq!(timeline.current_status.as_deref(), Some("Transferred"));
    }

    #[test]
    fn test_unknown_member_is_empty() {
        let db = Database::in_memory();
        let timeline = MemberTimeline::load(42, &db);
        assert!(timeline.is_empty());
        assert_eq!(timeline.current_status, None);
    }
}
