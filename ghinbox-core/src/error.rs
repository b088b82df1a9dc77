/// Top-level ghinbox error type.
///
/// All fallible operations in `ghinbox-core` return [`Result<T, InboxError>`](Result).
/// Each variant wraps a concern-specific error enum, allowing callers to
/// match on the error source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum InboxError {
    /// Error from the durable key-value layer (`SQLite` operations, schema).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error talking to the remote GitHub API.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A fact was rejected by the fact store schema.
    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaViolation),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from the durable key-value store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization of a stored record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The durable medium could not be opened, read, or written.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures fetching from the remote collaborator (network, auth, rate limit).
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Network-level failure (DNS, TLS, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// GitHub API returned a non-success HTTP status.
    #[error("GitHub API error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// Retries were exhausted while rate limited.
    #[error("GitHub API rate limit exceeded for {0}")]
    RateLimited(String),

    /// Response body did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// No token was found in the configured environment variable.
    #[error("GitHub API auth: token env var {0} is not set")]
    MissingToken(String),
}

/// A fact the fact store refused to apply.
///
/// The offending fact is dropped; the rest of its batch still commits.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// Two identity attributes in one fact resolve to two different entities.
    #[error("identity conflict: {first_attr}={first_value} is entity {first_entity}, {second_attr}={second_value} is entity {second_entity}")]
    IdentityConflict {
        first_attr: String,
        first_value: String,
        first_entity: u64,
        second_attr: String,
        second_value: String,
        second_entity: u64,
    },

    /// The attribute is not declared in the schema table.
    #[error("unknown attribute {0}")]
    UnknownAttribute(String),

    /// A lookup used an attribute that is not a unique identity.
    #[error("attribute {0} is not a unique identity and cannot be used for lookup")]
    NotIdentity(String),

    /// The value kind does not match the attribute's declared value type.
    #[error("attribute {attr} expects a {expected} value")]
    TypeMismatch { attr: String, expected: &'static str },

    /// A set of values was written to a cardinality-one attribute.
    #[error("attribute {0} has cardinality one but received several values")]
    CardinalityMismatch(String),

    /// The fact carries no unique identity attribute to upsert on.
    #[error("fact has no identity attribute")]
    MissingIdentity,

    /// A resolved entity handle does not exist in the store.
    #[error("entity {0} does not exist")]
    UnknownEntity(u64),
}

/// A text or URL reference that could not be turned into a canonical name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed reference: {0}")]
pub struct MalformedReference(pub String);

/// Errors in ghinbox configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, InboxError>`.
pub type Result<T> = std::result::Result<T, InboxError>;
