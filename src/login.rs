//! Login/session state machine
//!
//! Drives the chat surface through QR acquisition and login confirmation.
//! The stored state only ever advances (`Uninitialized` → `AwaitingQr` →
//! `LoggedIn`); the single path back is an explicit operator `rearm`.

use crate::browser::BrowserError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Interval between login-status probes while waiting for a scan
const LOGIN_POLL: Duration = Duration::from_secs(2);

/// How long the UI gets to render a scannable code before QR capture fails
const QR_STARTUP_WINDOW: Duration = Duration::from_secs(60);

const PROOF_FILENAME: &str = "login-proof.png";

/// What the login machine needs from the page. `WebChatPage` is the
/// production implementation; tests substitute fakes.
#[async_trait]
pub trait LoginSurface: Send + Sync {
    /// Is the main conversation view present right now? Must not block and
    /// must not error — a failed query reads as "not present".
    async fn main_view_present(&self) -> bool;

    /// Wait for the QR element and capture it as PNG bytes. May wait
    /// indefinitely; the caller bounds it.
    async fn qr_image(&self) -> Result<Vec<u8>, BrowserError>;

    /// Serialize the session blob to `path`. Idempotent overwrite.
    async fn persist_session(&self, path: &Path) -> Result<(), BrowserError>;

    /// Full-page confirmation screenshot to `path`.
    async fn proof_screenshot(&self, path: &Path) -> Result<(), BrowserError>;

    /// Discard current page state and re-navigate to the login surface.
    async fn reset_to_login(&self) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginState {
    Uninitialized,
    AwaitingQr,
    LoggedIn,
}

/// Login session record. Owned exclusively by the state machine; mutated
/// only on observed login-status transitions.
#[derive(Debug)]
struct Session {
    state: LoginState,
    blob_path: PathBuf,
    last_persisted_at: Option<DateTime<Utc>>,
}

/// Proof artifact returned once a login has been observed and persisted.
#[derive(Debug, Clone)]
pub struct SessionProof {
    /// Confirmation screenshot, when capturing it succeeded
    pub screenshot_path: Option<PathBuf>,
    pub logged_in_at: DateTime<Utc>,
}

/// Type alias for the production machine over the concrete chat surface
pub type ProductionLogin = LoginStateMachine<crate::chat::WebChatPage>;

pub struct LoginStateMachine<S> {
    surface: Arc<S>,
    session: RwLock<Session>,
    proof_dir: PathBuf,
}

impl<S: LoginSurface> LoginStateMachine<S> {
    pub fn new(surface: Arc<S>, blob_path: PathBuf, proof_dir: PathBuf) -> Self {
        Self {
            surface,
            session: RwLock::new(Session {
                state: LoginState::Uninitialized,
                blob_path,
                last_persisted_at: None,
            }),
            proof_dir,
        }
    }

    pub async fn state(&self) -> LoginState {
        self.session.read().await.state
    }

    /// Probe the surface for the main-view marker and fold the observation
    /// into the stored state. Never errors; a failed probe reads as
    /// `AwaitingQr`. The stored state never regresses here: once `LoggedIn`
    /// has been observed, a transient marker miss does not un-login the
    /// session.
    pub async fn probe_status(&self) -> LoginState {
        let observed = if self.surface.main_view_present().await {
            LoginState::LoggedIn
        } else {
            LoginState::AwaitingQr
        };
        self.advance(observed).await
    }

    async fn advance(&self, observed: LoginState) -> LoginState {
        let mut session = self.session.write().await;
        if observed > session.state {
            tracing::info!(from = ?session.state, to = ?observed, "login state advanced");
            session.state = observed;
        }
        session.state
    }

    /// Capture the login QR code as PNG bytes.
    ///
    /// Fails with `ElementNotFound` if the UI never renders a code within
    /// the startup window — it does not hang.
    pub async fn capture_qr_image(&self) -> Result<Vec<u8>, BrowserError> {
        match tokio::time::timeout(QR_STARTUP_WINDOW, self.surface.qr_image()).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::ElementNotFound(format!(
                "login code did not render within {QR_STARTUP_WINDOW:?}"
            ))),
        }
    }

    /// Block until the login is observed, then persist the session blob
    /// exactly once and capture a confirmation screenshot.
    ///
    /// No timeout by design — a human has to scan a code. Callers that need
    /// bounded waiting race this against their own timer. Persistence and
    /// screenshot failures are logged; the proof is still returned (the
    /// session simply won't survive a restart).
    pub async fn await_login(&self) -> SessionProof {
        loop {
            if self.probe_status().await == LoginState::LoggedIn {
                break;
            }
            tokio::time::sleep(LOGIN_POLL).await;
        }

        let logged_in_at = Utc::now();
        self.persist_once(logged_in_at).await;

        let screenshot_path = self.capture_proof().await;
        tracing::info!(proof = ?screenshot_path, "login confirmed");

        SessionProof {
            screenshot_path,
            logged_in_at,
        }
    }

    async fn persist_once(&self, at: DateTime<Utc>) {
        let blob_path = self.session.read().await.blob_path.clone();
        match self.surface.persist_session(&blob_path).await {
            Ok(()) => {
                self.session.write().await.last_persisted_at = Some(at);
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %blob_path.display(),
                    "session persist failed; login will not survive restart");
            }
        }
    }

    async fn capture_proof(&self) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.proof_dir).await {
            tracing::warn!(error = %e, "could not create proof directory");
            return None;
        }
        let path = self.proof_dir.join(PROOF_FILENAME);
        match self.surface.proof_screenshot(&path).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "proof screenshot failed");
                None
            }
        }
    }

    /// Re-persist the session blob on demand. Idempotent overwrite.
    pub async fn persist_now(&self) -> Result<(), BrowserError> {
        let blob_path = self.session.read().await.blob_path.clone();
        self.surface.persist_session(&blob_path).await?;
        self.session.write().await.last_persisted_at = Some(Utc::now());
        Ok(())
    }

    /// Operator-initiated reset: re-navigate to the login surface and drop
    /// back to `AwaitingQr`. Idempotent. This is the only state regression
    /// in the system, and it never happens automatically.
    pub async fn rearm(&self) -> Result<(), BrowserError> {
        self.surface.reset_to_login().await?;
        let mut session = self.session.write().await;
        session.state = LoginState::AwaitingQr;
        tracing::info!("re-armed; awaiting a fresh login scan");
        Ok(())
    }

    pub async fn last_persisted_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().await.last_persisted_at
    }
}
