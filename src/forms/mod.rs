//! Entity forms: field state, validation and payload normalisation.

pub mod activity_form;
pub mod church_form;
pub mod guard;
pub mod member_form;
pub mod validate;

use thiserror::Error;

use crate::error::ServiceError;

/// Why a form submission did not go through. Field values are kept in every case.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a submission is already in progress")]
    InFlight,

    #[error("{count} field(s) need attention: {first}")]
    Invalid { count: usize, first: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl SubmitError {
    /// Text for the status-bar toast.
    pub fn toast(&self) -> String {
        match self {
            SubmitError::Service(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Step an index through `len` options, wrapping at both ends.
pub fn cycle(index: usize, len: usize, forward: bool) -> usize {
    if len == 0 {
        return 0;
    }
    if forward {
        (index + 1) % len
    } else if index == 0 {
        len - 1
    } else {
        index - 1
    }
}
