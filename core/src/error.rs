use thiserror::Error;

#[derive(Error, Debug)]
pub enum RfaError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No member contract available for member_code={member_code:?} group={group_name:?}")]
    NoContractAvailable {
        member_code: Option<String>,
        group_name:  Option<String>,
    },

    #[error("Entity '{entity}' not found in the current dataset")]
    EntityNotFound { entity: String },

    #[error("Contract {id} not found")]
    ContractNotFound { id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RfaResult<T> = Result<T, RfaError>;

/// Non-fatal data problems surfaced alongside results so administrators
/// can fix the catalog without the whole report failing.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum DataIntegrityWarning {
    /// An override's custom tier table failed validation and was ignored.
    MalformedOverride {
        target:    String,
        field_key: String,
        tier_kind: String,
    },
    /// A member references a group name with no matching group aggregate.
    UnknownGroup {
        member_code: String,
        group_name:  String,
    },
    /// An override references a field key the catalog does not know.
    UnknownOverrideField { target: String, field_key: String },
    /// A member's rows disagree on group attribution; the first row wins.
    InconsistentGroup {
        member_code: String,
        kept:        String,
        ignored:     String,
    },
}
