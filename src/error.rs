//! Error types for sword-server
//!
//! Two layers:
//! - [`ServerError`] - unexpected faults (storage I/O, corrupt persisted
//!   statements). Propagated with `?` and rendered as a bare 500.
//! - [`SwordError`] - protocol error conditions. These are values carried
//!   inside responses, rendered as a SWORD error document.

use crate::namespaces::{ATOM_NS, DATE_FORMAT, GENERATOR_URI, GENERATOR_VERSION, SWORD_NS};
use crate::xml::DocWriter;
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Statement parse error: {0}")]
    Statement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<quick_xml::events::attributes::AttrError> for ServerError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        ServerError::Xml(quick_xml::Error::InvalidAttr(e))
    }
}

/// SWORD error conditions, each identified by a fixed URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Content,
    ChecksumMismatch,
    BadRequest,
    TargetOwnerUnknown,
    MediationNotAllowed,
    MethodNotAllowed,
    MaxUploadSizeExceeded,
}

impl ErrorKind {
    pub fn uri(&self) -> &'static str {
        match self {
            ErrorKind::Content => "http://purl.org/net/sword/error/ErrorContent",
            ErrorKind::ChecksumMismatch => "http://purl.org/net/sword/error/ErrorChecksumMismatch",
            ErrorKind::BadRequest => "http://purl.org/net/sword/error/ErrorBadRequest",
            ErrorKind::TargetOwnerUnknown => "http://purl.org/net/sword/error/TargetOwnerUnknown",
            ErrorKind::MediationNotAllowed => {
                "http://purl.org/net/sword/error/MediationNotAllowed"
            }
            ErrorKind::MethodNotAllowed => "http://purl.org/net/sword/error/MethodNotAllowed",
            ErrorKind::MaxUploadSizeExceeded => {
                "http://purl.org/net/sword/error/MaxUploadSizeExceeded"
            }
        }
    }

    pub fn default_status(&self) -> u16 {
        match self {
            ErrorKind::Content => 400,
            ErrorKind::ChecksumMismatch => 412,
            ErrorKind::BadRequest => 400,
            ErrorKind::TargetOwnerUnknown => 401,
            ErrorKind::MediationNotAllowed => 412,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::MaxUploadSizeExceeded => 413,
        }
    }
}

/// A protocol error with the status it should be served with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwordError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

impl SwordError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            message: message.into(),
        }
    }

    /// Serve under a different status, e.g. 406 for a failed negotiation
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Render the `sword:error` document
    pub fn to_xml(&self) -> Result<String, ServerError> {
        let uri = self.kind.uri();
        let updated = Utc::now().format(DATE_FORMAT).to_string();
        let mut doc = DocWriter::new()?;
        doc.start(
            "sword:error",
            &[("xmlns", ATOM_NS), ("xmlns:sword", SWORD_NS), ("href", uri)],
        )?;
        doc.start("author", &[])?;
        doc.text("name", &[], "SSS")?;
        doc.end("author")?;
        doc.text("title", &[], &format!("ERROR: {}", uri))?;
        doc.text("updated", &[], &updated)?;
        doc.empty(
            "generator",
            &[("uri", GENERATOR_URI), ("version", GENERATOR_VERSION)],
        )?;
        doc.text(
            "summary",
            &[],
            &format!("Error Description: {} ; {}", uri, self.message),
        )?;
        doc.text("sword:treatment", &[], "processing failed")?;
        doc.text("sword:verboseDescription", &[], &self.message)?;
        doc.end("sword:error")?;
        Ok(doc.finish())
    }
}

impl std::fmt::Display for SwordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.kind.uri(), self.status, self.message)
    }
}
