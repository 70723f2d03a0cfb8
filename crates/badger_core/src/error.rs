//! Error types for storage backends and provisioning.
//!
//! Absence is not an error anywhere in this crate; these types describe
//! things that actually went wrong.

/// Failures raised by a persistence or queue backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the call
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    /// A write violated a relational constraint (foreign key, uniqueness)
    #[error("Constraint violation: {0}")]
    Constraint(String),
    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }
}

/// Failures surfaced by provisioning operations and server actions.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// A backend call failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A configuration could not be serialized
    #[error("Config serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A record required by a user-triggered action is absent
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// No provisioner is registered for the game
    #[error("No provisioner registered for game: {0}")]
    UnknownGame(String),
    /// A configuration failed schema validation
    #[error("Invalid configuration for {0}")]
    InvalidConfig(String),
}

impl ProvisionError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
