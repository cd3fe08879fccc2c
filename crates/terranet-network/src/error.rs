use terranet_graph::Gfid;
use terranet_rules::RuleParseError;
use terranet_storage::StorageError;
use thiserror::Error;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Failures surfaced by network operations.
///
/// Pathfinding never appears here: unreachable targets and unknown endpoints
/// are empty results, not errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Malformed rule text or a rule referencing an unknown layer.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The connection is denied by the rule set (or no rules are present,
    /// which denies everything).
    #[error("connection forbidden: {0}")]
    RuleViolation(String),

    /// The exact (source, target, connector) triple already exists.
    #[error("connection {source} -> {target} via {connector} already exists")]
    DuplicateConnection {
        // Spelled as a raw identifier so thiserror does not treat this plain
        // Gfid as the error's source() — raw idents escape the implicit
        // `source` field detection while remaining the same field name.
        r#source: Gfid,
        target: Gfid,
        connector: Gfid,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<RuleParseError> for NetworkError {
    fn from(err: RuleParseError) -> Self {
        NetworkError::Validation(err.to_string())
    }
}
