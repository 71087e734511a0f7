//! Transport-agnostic request and response values
//!
//! The HTTP layer parses headers and bodies into these once; the engine
//! never sees raw headers.

use crate::error::SwordError;
use crate::namespaces::packaging;
use crate::negotiator::ContentType;
use std::path::PathBuf;

/// Authenticated identity of a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub username: String,
    pub on_behalf_of: Option<String>,
}

impl Auth {
    pub fn new(username: impl Into<String>, on_behalf_of: Option<String>) -> Self {
        Self {
            username: username.into(),
            on_behalf_of,
        }
    }
}

/// A deposit, normalised from binary, Atom entry and multipart submissions
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub content: Option<Vec<u8>>,
    /// Atom entry document
    pub atom: Option<Vec<u8>>,
    pub filename: String,
    pub packaging: String,
    pub in_progress: bool,
    pub metadata_relevant: bool,
    pub content_md5: Option<String>,
    pub slug: Option<String>,
    pub content_length: u64,
    pub auth: Auth,
}

impl Default for DepositRequest {
    fn default() -> Self {
        Self {
            content: None,
            atom: None,
            filename: "unnamed.file".to_string(),
            packaging: packaging::BINARY.to_string(),
            in_progress: false,
            metadata_relevant: true,
            content_md5: None,
            slug: None,
            content_length: 0,
            auth: Auth::default(),
        }
    }
}

impl DepositRequest {
    pub fn binary(content: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            content_length: content.len() as u64,
            content: Some(content),
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub fn entry(atom: Vec<u8>) -> Self {
        Self {
            content_length: atom.len() as u64,
            atom: Some(atom),
            ..Self::default()
        }
    }

    pub fn multipart(atom: Vec<u8>, content: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            atom: Some(atom),
            ..Self::binary(content, filename)
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_packaging(mut self, packaging: impl Into<String>) -> Self {
        self.packaging = packaging.into();
        self
    }

    pub fn with_in_progress(mut self, in_progress: bool) -> Self {
        self.in_progress = in_progress;
        self
    }

    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn has_atom(&self) -> bool {
        self.atom.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Neither content nor metadata was supplied
    pub fn is_empty(&self) -> bool {
        !self.has_content() && !self.has_atom()
    }

    pub fn on_behalf_of(&self) -> Option<&str> {
        self.auth.on_behalf_of.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub in_progress: bool,
    pub metadata_relevant: bool,
    pub auth: Auth,
}

impl Default for DeleteRequest {
    fn default() -> Self {
        Self {
            in_progress: false,
            metadata_relevant: true,
            auth: Auth::default(),
        }
    }
}

impl DeleteRequest {
    pub fn on_behalf_of(&self) -> Option<&str> {
        self.auth.on_behalf_of.as_deref()
    }
}

/// Outcome of a deposit. `receipt` is the response copy, augmented with
/// links to the original deposit and derived resources.
#[derive(Debug, Clone)]
pub enum DepositResponse {
    Created { location: String, receipt: String },
    Accepted { location: String, receipt: String },
    Error(SwordError),
}

impl DepositResponse {
    pub fn is_created(&self) -> bool {
        matches!(self, DepositResponse::Created { .. })
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, DepositResponse::Accepted { .. })
    }

    pub fn error(&self) -> Option<&SwordError> {
        match self {
            DepositResponse::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn receipt(&self) -> Option<&str> {
        match self {
            DepositResponse::Created { receipt, .. } | DepositResponse::Accepted { receipt, .. } => {
                Some(receipt)
            }
            DepositResponse::Error(_) => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            DepositResponse::Created { location, .. } | DepositResponse::Accepted { location, .. } => {
                Some(location)
            }
            DepositResponse::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DeleteResponse {
    /// Content cleared; the container remains with a fresh receipt
    Receipt(String),
    /// Container removed
    Deleted,
    Error(SwordError),
}

/// Result of fetching the media resource in a negotiated format
#[derive(Debug, Clone)]
pub enum MediaResource {
    Redirect(String),
    Package {
        path: PathBuf,
        content_type: ContentType,
        packaging: Option<String>,
    },
}

/// A negotiated representation of a container
#[derive(Debug, Clone)]
pub struct Representation {
    pub content_type: String,
    pub body: String,
}
