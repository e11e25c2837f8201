//! Error types for the pure core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid handler pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
