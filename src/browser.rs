//! Browser session facade
//!
//! The one place in the crate that touches the automation driver. Everything
//! above this module speaks in selectors, paths, and JSON values.

mod session;

pub use session::BrowserSession;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// An expected UI element is absent. Non-fatal: callers abandon the
    /// current step or task.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("failed to persist session state: {0}")]
    SessionPersist(String),

    #[error("browser operation failed: {0}")]
    Operation(String),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Operation(e.to_string())
    }
}
