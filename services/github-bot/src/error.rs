//! Gateway errors

use thiserror::Error;

/// Errors that can occur while talking to the GitHub API
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered with a non-success status
    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JWT or installation token could not be produced
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No single installation matched the organization within the attempt bound
    #[error("No unique installation for organization {org} after {attempts} attempt(s)")]
    InstallationUnresolved { org: String, attempts: u32 },
}

impl GatewayError {
    /// HTTP status, when the error came from an API response
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } => Some(*status),
            GatewayError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
