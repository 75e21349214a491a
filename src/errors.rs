use thiserror::Error;

use crate::bundle::Addr;

pub type BundleResult<T> = Result<T, BundleError>;

/// A single field that failed type checking against the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTypeError {
    pub iid: String,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "- iid: {}, field: {}, error: {}",
            self.iid, self.field, self.message
        )
    }
}

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Missing reference (IID {0})")]
    MissingReference(String),

    #[error("Missing xref ({}, {}) (only know about: {})", .addr.uuid, .addr.iid, .known.join(", "))]
    MissingXref { addr: Addr, known: Vec<String> },

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Unknown field {class}.{field}")]
    UnknownField { class: String, field: String },

    #[error("Missing required field {class}.{field} (IID {iid})")]
    MissingField {
        class: String,
        field: String,
        iid: String,
    },

    #[error("Field {class}.{field} expected {expected}, found {found}")]
    FieldKindMismatch {
        class: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("Cached instance {} {} has unexpected type {found}, expected {expected}", .addr.uuid, .addr.iid)]
    CachedTypeMismatch {
        addr: Addr,
        found: String,
        expected: String,
    },

    #[error("Unknown instance #{0}")]
    UnknownInstance(usize),

    #[error("Root instance belongs to bundle {owner}, not {uuid}")]
    ForeignRoot { uuid: String, owner: String },

    #[error("Type checking error\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    TypeCheck(Vec<FieldTypeError>),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid migration version key: {0}")]
    InvalidVersion(String),

    #[error("Bundle version {found} is newer than the latest known migration {latest}")]
    VersionTooNew { found: String, latest: String },

    #[error("Migration {next} must come after {previous}")]
    MigrationOrder { previous: String, next: String },

    #[error("Migration {version} failed: {source}")]
    MigrationFailed {
        version: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unexpected root of type {0}, expected Site or ProjectDependency")]
    UnexpectedRoot(String),

    #[error("Entity Not Found: {0}")]
    EntityNotFound(String),

    #[error("Dependency cycle through bundle {0}")]
    DependencyCycle(String),

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML Decode Error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("TOML Encode Error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Sled Error: {0}")]
    Sled(#[from] sled::Error),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error("{0}")]
    Other(String),
}
