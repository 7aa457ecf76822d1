//! Error types shared by the data store, services and forms.

use thiserror::Error;

/// Failure reported by a service collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// A unique value (email, CNPJ, CPF) already belongs to another record.
    #[error("{field} '{value}' is already in use")]
    Conflict { field: &'static str, value: String },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("asset error: {0}")]
    Asset(String),

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data file error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    /// Best-effort message suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::NotFound { entity, .. } => format!("The {} no longer exists", entity),
            ServiceError::Conflict { field, .. } => format!("This {} is already registered", field),
            ServiceError::Invalid { message, .. } => message.clone(),
            ServiceError::Asset(msg) => msg.clone(),
            other => format!("Could not save: {}", other),
        }
    }

    /// Form field the error belongs to, when the service attributed one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ServiceError::Conflict { field, .. } | ServiceError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_and_field() {
        let conflict = ServiceError::Conflict { field: "email", value: "a@x.org".into() };
        assert_eq!(conflict.user_message(), "This email is already registered");
        assert_eq!(conflict.field(), Some("email"));

        let missing = ServiceError::NotFound { entity: "member", id: 3 };
        assert_eq!(missing.user_message(), "The member no longer exists");
        assert_eq!(missing.field(), None);
    }
}
