//! Error types for PKI operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// PKI-specific errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// A required certificate or key file does not exist
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// PEM or ASN.1 decoding failed
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// What was being decoded
        what: &'static str,
        /// Decoder error text
        detail: String,
    },

    /// I/O error while reading or writing key material
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Certificate or key generation failed
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    /// A leaf must enable at least one of server or client auth
    #[error("certificate must enable at least one of server or client auth")]
    NoRole,

    /// Building a TLS configuration failed
    #[error("tls configuration: {0}")]
    Tls(String),
}

impl PkiError {
    pub(crate) fn malformed(what: &'static str, detail: impl ToString) -> Self {
        Self::Malformed {
            what,
            detail: detail.to_string(),
        }
    }
}
