//! Logged-in actor and the active church/branch context.
//!
//! The active context is the only state read by several independent screens. It
//! lives behind one accessor: readers resolve it through the church service on
//! first read, writers invalidate it, and subscribers are told when it changes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fields::SystemRole;
use crate::member::Member;
use crate::service::ChurchService;

/// The user operating the tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<u64>,
    pub name: String,
    pub email: String,
    pub role: SystemRole,
}

impl Default for Actor {
    fn default() -> Self {
        Actor {
            user_id: None,
            name: "Administrator".to_string(),
            email: "admin@localhost".to_string(),
            role: SystemRole::DenominationAdmin,
        }
    }
}

impl Actor {
    /// Roles this actor may assign to other users.
    ///
    /// A denomination admin grants every role; everyone else only roles strictly
    /// below their own.
    pub fn grantable_roles(&self) -> Vec<SystemRole> {
        SystemRole::all()
            .into_iter()
            .filter(|r| self.role == SystemRole::DenominationAdmin || r.rank() > self.role.rank())
            .collect()
    }

    /// Name recorded in history entries for changes made by this actor.
    pub fn label(&self) -> String {
        if self.email.trim().is_empty() {
            self.name.clone()
        } else {
            self.email.clone()
        }
    }

    pub fn can_grant(&self, role: SystemRole) -> bool {
        self.grantable_roles().contains(&role)
    }

    /// Whether `member` is this actor's own record.
    ///
    /// Matched by linked user id, or case-insensitively by email against the
    /// member's login email or personal email.
    pub fn is_self(&self, member: &Member) -> bool {
        if let (Some(a), Some(b)) = (self.user_id, member.user_id) {
            if a == b {
                return true;
            }
        }
        let mine = self.email.trim();
        if mine.is_empty() {
            return false;
        }
        [member.user_email.as_deref(), member.email.as_deref()]
            .into_iter()
            .flatten()
            .any(|e| e.trim().eq_ignore_ascii_case(mine))
    }
}

/// Identifiers of the active church and branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextIds {
    pub church_id: Option<u64>,
    pub branch_id: Option<u64>,
}

/// Resolved active context with display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub church_id: Option<u64>,
    pub church_name: Option<String>,
    pub branch_id: Option<u64>,
    pub branch_name: Option<String>,
}

impl Selection {
    pub fn label(&self) -> String {
        match (&self.church_name, &self.branch_name) {
            (Some(c), Some(b)) => format!("{} / {}", c, b),
            (Some(c), None) => c.clone(),
            _ => "No church selected".to_string(),
        }
    }
}

type Subscriber = Box<dyn Fn(ContextIds)>;

/// Shared accessor for the active church/branch.
pub struct ActiveContext {
    ids: ContextIds,
    cached: Option<Selection>,
    subscribers: Vec<(usize, Subscriber)>,
    next_subscriber: usize,
}

impl ActiveContext {
    pub fn new(ids: ContextIds) -> Self {
        ActiveContext { ids, cached: None, subscribers: Vec::new(), next_subscriber: 0 }
    }

    pub fn ids(&self) -> ContextIds {
        self.ids
    }

    pub fn church_id(&self) -> Option<u64> {
        self.ids.church_id
    }

    /// Read-through: resolve names on first read after an invalidation.
    pub fn resolve(&mut self, churches: &dyn ChurchService) -> &Selection {
        if self.cached.is_none() {
            let mut selection = Selection { church_id: self.ids.church_id, branch_id: self.ids.branch_id, ..Selection::default() };
            if let Some(church_id) = self.ids.church_id {
                match churches.get_church(church_id) {
                    Ok(church) => selection.church_name = Some(church.name),
                    Err(e) => warn!(church_id, error = %e, "active church could not be resolved"),
                }
                if let Some(branch_id) = self.ids.branch_id {
                    match churches.list_branches(church_id) {
                        Ok(branches) => {
                            selection.branch_name = branches.into_iter().find(|b| b.id == branch_id).map(|b| b.name)
                        }
                        Err(e) => warn!(church_id, error = %e, "branches could not be loaded"),
                    }
                }
            }
            debug!(?selection, "active context resolved");
            self.cached = Some(selection);
        }
        self.cached.get_or_insert_with(Selection::default)
    }

    /// Drop cached names; the next read refetches them.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Switch church. Clears the branch, which belonged to the previous church.
    pub fn select_church(&mut self, church_id: Option<u64>) {
        if self.ids.church_id == church_id {
            return;
        }
        self.ids = ContextIds { church_id, branch_id: None };
        self.changed();
    }

    pub fn select_branch(&mut self, branch_id: Option<u64>) {
        if self.ids.branch_id == branch_id {
            return;
        }
        self.ids.branch_id = branch_id;
        self.changed();
    }

    pub fn subscribe(&mut self, callback: impl Fn(ContextIds) + 'static) -> usize {
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: usize) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    fn changed(&mut self) {
        self.invalidate();
        for (_, callback) in &self.subscribers {
            callback(self.ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::church::Address;
    use crate::db::tests::{church_payload, member_payload};
    use crate::db::Database;
    use crate::service::{ChurchService, MemberService};

    #[test]
    fn test_actor_label_falls_back_to_name() {
        let actor = Actor { email: " ".into(), ..Actor::default() };
        assert_eq!(actor.label(), "Administrator");
        assert_eq!(Actor::default().label(), "admin@localhost");
    }

    #[test]
    fn test_grantable_roles_are_below_actor() {
        let secretary = Actor { role: SystemRole::Secretary, ..Actor::default() };
        assert_eq!(secretary.grantable_roles(), vec![SystemRole::Leader, SystemRole::ReadOnly]);
        assert!(!secretary.can_grant(SystemRole::Secretary));
        assert_eq!(Actor::default().grantable_roles().len(), 6);
        let read_only = Actor { role: SystemRole::ReadOnly, ..Actor::default() };
        assert!(read_only.grantable_roles().is_empty());
    }

    #[test]
    fn test_self_match_by_user_id_or_email() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let mut payload = member_payload(church.id, "Ana");
        payload.email = Some("Ana@Example.com".to_string());
        let member = db.create_member(payload, "admin").unwrap();

        let actor = Actor { email: "ana@example.com".to_string(), ..Actor::default() };
        assert!(actor.is_self(&member));

        let other = Actor { email: "bob@example.com".to_string(), user_id: Some(7), ..Actor::default() };
        assert!(!other.is_self(&member));
        let linked = Member { user_id: Some(7), ..member };
        assert!(other.is_self(&linked));
    }

    #[test]
    fn test_context_resolves_once_and_notifies() {
        let mut db = Database::in_memory();
        let church = db.create_church(church_payload("Betel", "b@x.org")).unwrap();
        let branch = db.create_branch(church.id, "Centro", Address::default()).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = ActiveContext::new(ContextIds::default());
        let sink = seen.clone();
        let sub = ctx.subscribe(move |ids| sink.borrow_mut().push(ids));

        assert_eq!(ctx.resolve(&db).label(), "No church selected");
        ctx.select_church(Some(church.id));
        ctx.select_branch(Some(branch.id));
        assert_eq!(ctx.resolve(&db).label(), "Betel / Centro");
        assert_eq!(seen.borrow().len(), 2);

        ctx.select_church(Some(church.id));
        assert_eq!(seen.borrow().len(), 2);

        ctx.unsubscribe(sub);
        ctx.select_church(None);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(ctx.ids(), ContextIds::default());
    }
}
