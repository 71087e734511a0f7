//! HTTP Basic authentication with optional on-behalf-of mediation

use crate::config::Config;
use crate::error::{ErrorKind, SwordError};
use crate::request::Auth;
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a request was not authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `Authorization` header; the client should be challenged
    MissingCredentials,
    InvalidCredentials,
    /// Credentials were fine but the on-behalf-of user is not known
    TargetOwnerUnknown(String),
}

impl AuthFailure {
    /// Error document to send, if any. Plain credential failures get a bare 401.
    pub fn sword_error(&self) -> Option<SwordError> {
        match self {
            AuthFailure::TargetOwnerUnknown(obo) => {
                Some(SwordError::new(ErrorKind::TargetOwnerUnknown, obo.clone()))
            }
            _ => None,
        }
    }
}

pub struct Authenticator {
    config: Arc<Config>,
}

impl Authenticator {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Check an `Authorization: Basic ...` header value.
    ///
    /// The on-behalf-of user is only checked when mediation is enabled; with
    /// mediation off it is passed through so the deposit pre-checks can
    /// reject it as MediationNotAllowed.
    pub fn basic_authenticate(
        &self,
        authorization: Option<&str>,
        on_behalf_of: Option<&str>,
    ) -> Result<Auth, AuthFailure> {
        let on_behalf_of = on_behalf_of.map(str::to_string);

        if !self.config.authenticate {
            debug!("Authentication is turned off");
            return Ok(Auth::new(self.config.user.clone(), on_behalf_of));
        }

        let header = authorization.ok_or(AuthFailure::MissingCredentials)?;
        let (username, password) = decode_basic(header).ok_or(AuthFailure::InvalidCredentials)?;

        if username != self.config.user || password != self.config.password {
            info!(user = %username, "Authentication failed");
            return Err(AuthFailure::InvalidCredentials);
        }

        if let Some(obo) = &on_behalf_of {
            if self.config.mediation && obo != &self.config.obo {
                info!(user = %username, on_behalf_of = %obo, "Target owner unknown");
                return Err(AuthFailure::TargetOwnerUnknown(obo.clone()));
            }
        }

        Ok(Auth::new(username, on_behalf_of))
    }
}

/// `Basic dXNlcjpwYXNz` -> `("user", "pass")`
fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.trim().strip_prefix("Basic ")?.trim();
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
