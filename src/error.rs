use serde_json::json;

/// Failure of a core operation. A schedule conflict is not one of these:
/// it comes back as `SaveOutcome::Rejected`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    /// A referential invariant (ownership, enrollment) forbids the write.
    #[error("{message}")]
    Blocked {
        message: String,
        details: serde_json::Value,
    },

    #[error("storage error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn blocked(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Blocked {
            message: message.into(),
            details,
        }
    }

    /// Stable code used in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::Blocked { .. } => "blocked",
            Self::Persistence(_) => "db_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::Blocked { details, .. } => Some(details.clone()),
            Self::Persistence(_) => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
