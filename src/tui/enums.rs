//! Enumerations for TUI state management.

use crate::fields::BatchAction;

/// Application state for the terminal user interface.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum AppState {
    ChurchList,
    ChurchDetail,
    ChurchForm,
    MemberList,
    MemberForm,
    MemberHistory,
    ActivityForm,
    ContextPicker,
    Help,
    Confirm,
}

/// What keystrokes are currently feeding.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum InputMode {
    None,
    Search,
    StateFilter,
    BranchName,
}

/// Destructive action waiting for a y/n answer.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PendingAction {
    DeleteChurch(u64),
    DeleteMember(u64),
    Bulk(BatchAction),
}
