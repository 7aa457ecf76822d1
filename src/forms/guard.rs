//! Confirmation-guarded form fields.
//!
//! Membership status and ministerial function carry organisational consequences,
//! so when an existing member is edited a new value is held as a pending change
//! until the user confirms it. The committed value is what every control renders;
//! it only moves to the proposed value on `confirm`.
//!
//! ```text
//! Idle --request_change(next != current)--> Pending { current, next }
//! Pending --confirm--> Idle (committed = next, dirty)
//! Pending --cancel---> Idle (committed unchanged)
//! ```

use crate::fields::{MembershipStatus, MinisterialFunction};

/// How a value is presented in the confirmation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Ordinary,
    Significant,
    Critical,
}

/// Values that classify themselves for dialog styling.
pub trait Classified {
    fn severity(&self) -> Severity;
}

impl Classified for MembershipStatus {
    fn severity(&self) -> Severity {
        match self {
            MembershipStatus::Deceased | MembershipStatus::Excluded | MembershipStatus::Transferred => Severity::Critical,
            _ => Severity::Ordinary,
        }
    }
}

impl Classified for MinisterialFunction {
    fn severity(&self) -> Severity {
        match self {
            MinisterialFunction::Pastor
            | MinisterialFunction::Elder
            | MinisterialFunction::Deacon
            | MinisterialFunction::Deaconess => Severity::Significant,
            _ => Severity::Ordinary,
        }
    }
}

/// A proposed but not yet committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange<T> {
    pub current: T,
    pub next: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState<T> {
    Idle,
    Pending(PendingChange<T>),
}

/// Result of asking for a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Committed right away (creation flow).
    Applied,
    /// Same as the committed value; nothing happened.
    Unchanged,
    /// Held pending; a confirmation dialog should open.
    NeedsConfirmation,
}

/// A field whose edits of an existing record need explicit confirmation.
#[derive(Debug, Clone)]
pub struct GuardedField<T> {
    committed: T,
    state: GuardState<T>,
    guarded: bool,
    dirty: bool,
}

impl<T: Copy + PartialEq> GuardedField<T> {
    /// Field for a record being created: changes apply immediately.
    pub fn unguarded(value: T) -> Self {
        GuardedField { committed: value, state: GuardState::Idle, guarded: false, dirty: false }
    }

    /// Field for an existing record: changes wait for confirmation.
    pub fn guarded(value: T) -> Self {
        GuardedField { committed: value, state: GuardState::Idle, guarded: true, dirty: false }
    }

    /// The committed value, which is also what the control renders.
    pub fn value(&self) -> T {
        self.committed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pending(&self) -> Option<PendingChange<T>> {
        match self.state {
            GuardState::Idle => None,
            GuardState::Pending(p) => Some(p),
        }
    }

    pub fn request_change(&mut self, proposed: T) -> ChangeOutcome {
        if proposed == self.committed {
            self.state = GuardState::Idle;
            return ChangeOutcome::Unchanged;
        }
        if !self.guarded {
            self.committed = proposed;
            self.dirty = true;
            return ChangeOutcome::Applied;
        }
        self.state = GuardState::Pending(PendingChange { current: self.committed, next: proposed });
        ChangeOutcome::NeedsConfirmation
    }

    /// Commit the pending value. Returns it, or `None` if nothing was pending.
    pub fn confirm(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, GuardState::Idle) {
            GuardState::Pending(p) => {
                self.committed = p.next;
                self.dirty = true;
                Some(p.next)
            }
            GuardState::Idle => None,
        }
    }

    /// Discard the pending value.
    pub fn cancel(&mut self) {
        self.state = GuardState::Idle;
    }
}

impl<T: Copy + PartialEq + Classified> GuardedField<T> {
    /// Severity of the pending target, if a change is pending.
    pub fn pending_severity(&self) -> Option<Severity> {
        self.pending().map(|p| p.next.severity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_change_waits_for_confirm() {
        let mut status = GuardedField::guarded(MembershipStatus::Active);
        assert_eq!(status.request_change(MembershipStatus::Deceased), ChangeOutcome::NeedsConfirmation);
        assert_eq!(status.value(), MembershipStatus::Active);
        assert_eq!(status.pending_severity(), Some(Severity::Critical));

        assert_eq!(status.confirm(), Some(MembershipStatus::Deceased));
        assert_eq!(status.value(), MembershipStatus::Deceased);
        assert!(status.pending().is_none());
        assert!(status.is_dirty());
    }

    #[test]
    fn test_cancel_restores_committed_value() {
        let mut status = GuardedField::guarded(MembershipStatus::Active);
        status.request_change(MembershipStatus::Excluded);
        status.cancel();
        assert_eq!(status.value(), MembershipStatus::Active);
        assert!(status.pending().is_none());
        assert!(!status.is_dirty());
        assert_eq!(status.confirm(), None);
    }

    #[test]
    fn test_same_value_is_noop() {
        let mut function = GuardedField::guarded(MinisterialFunction::Deacon);
        assert_eq!(function.request_change(MinisterialFunction::Deacon), ChangeOutcome::Unchanged);
        assert!(function.pending().is_none());
        assert!(!function.is_dirty());
    }

    #[test]
    fn test_creation_applies_immediately() {
        let mut status = GuardedField::unguarded(MembershipStatus::Active);
        assert_eq!(status.request_change(MembershipStatus::Inactive), ChangeOutcome::Applied);
        assert_eq!(status.value(), MembershipStatus::Inactive);
        assert!(status.pending().is_none());
    }

    #[test]
    fn test_new_request_replaces_pending_target() {
        let mut function = GuardedField::guarded(MinisterialFunction::Member);
        function.request_change(MinisterialFunction::Leader);
        function.request_change(MinisterialFunction::Pastor);
        assert_eq!(
            function.pending(),
            Some(PendingChange { current: MinisterialFunction::Member, next: MinisterialFunction::Pastor })
        );
        assert_eq!(function.pending_severity(), Some(Severity::Significant));
    }

    #[test]
    fn test_classification() {
        assert_eq!(MembershipStatus::Transferred.severity(), Severity::Critical);
        assert_eq!(MembershipStatus::Inactive.severity(), Severity::Ordinary);
        assert_eq!(MinisterialFunction::Deaconess.severity(), Severity::Significant);
        assert_eq!(MinisterialFunction::Missionary.severity(), Severity::Ordinary);
    }
}
