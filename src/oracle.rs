//! Reply oracle: the external text-generation collaborator
//!
//! The oracle is stateless per call — all context rides in the transcript.
//! Its only control token is the literal `"skip"` (case-insensitive,
//! trimmed), which means "stay silent for this conversation".

mod gemini;

pub use gemini::{GeminiOracle, OracleConfig};

use crate::chat::Message;
use async_trait::async_trait;
use thiserror::Error;

/// What to do with a conversation, parsed from raw oracle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDecision {
    Send(String),
    Skip,
}

impl ReplyDecision {
    /// Parse raw oracle output. Empty output and the skip sentinel both
    /// read as `Skip`; anything else is a `Send` of the trimmed text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("skip") {
            ReplyDecision::Skip
        } else {
            ReplyDecision::Send(trimmed.to_string())
        }
    }
}

/// Client for the reply oracle.
#[async_trait]
pub trait ReplyOracle: Send + Sync {
    /// Produce raw reply text for a transcript (oldest message first).
    ///
    /// Callers must treat any error as a `Skip`: silence is the fail-safe
    /// default, never a crash and never a garbage send.
    async fn reply(&self, transcript: &[Message], is_group: bool) -> Result<String, OracleError>;
}

/// Oracle error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OracleError {
    pub kind: OracleErrorKind,
    pub message: String,
}

impl OracleError {
    pub fn new(kind: OracleErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(OracleErrorKind::Unknown, message)
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleErrorKind {
    /// Network issues, timeouts
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403) or missing key
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// Unknown error
    Unknown,
}
