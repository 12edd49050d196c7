use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UmbraError>;

#[derive(Debug, Error)]
pub enum UmbraError {
    /// Storage failure. The transaction that observed it is poisoned and must
    /// be closed without committing.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    /// Persisted bytes that cannot be decoded under the key layout.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// A schema mutation that would break a graph invariant. The mutation is
    /// rejected; the transaction remains usable.
    #[error("illegal schema mutation: {0}")]
    SchemaMutation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl UmbraError {
    pub fn is_schema_mutation(&self) -> bool {
        matches!(self, UmbraError::SchemaMutation(_))
    }
}
