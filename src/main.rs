//! chatghost - automated reply service for a single web-chat account
//!
//! Keeps one persistent browser session logged into the chat application,
//! watches the conversation list for unread threads, asks the reply oracle
//! what to say, and types the answer back with human pacing.

mod api;
mod browser;
mod chat;
mod config;
mod login;
mod oracle;
mod queue;
mod watcher;

use api::{create_router, AppState};
use browser::BrowserSession;
use chat::WebChatPage;
use config::Config;
use login::LoginStateMachine;
use oracle::{GeminiOracle, OracleConfig};
use queue::ConversationQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use watcher::ChatEventWatcher;

/// Delay between observer-install attempts after login
const WATCH_RETRY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatghost=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // One browser, one page, for the life of the process.
    let session = Arc::new(BrowserSession::launch().await?);

    // Restore must precede the first navigation to take effect.
    let restored = session.restore_session(&config.session_file).await?;
    session.navigate(&config.chat_url).await?;

    let page = Arc::new(WebChatPage::new(session.clone(), config.chat_url.clone()));
    let login = Arc::new(LoginStateMachine::new(
        page.clone(),
        config.session_file.clone(),
        config.proof_dir.clone(),
    ));

    let initial = login.probe_status().await;
    tracing::info!(restored, state = ?initial, "session activated");

    let oracle_config = OracleConfig::from_env();
    if !oracle_config.is_configured() {
        tracing::warn!(
            "GEMINI_API_KEY not set; every conversation will be skipped until it is"
        );
    }
    let oracle = Arc::new(GeminiOracle::new(oracle_config));

    let queue = Arc::new(ConversationQueue::spawn(page.clone(), oracle));
    let watcher = ChatEventWatcher::new(session.clone());

    // Background: wait for the human to scan, then start feeding the queue.
    tokio::spawn(watch_after_login(login.clone(), watcher, queue));

    // Operator surface
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(login))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("chatghost listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Block on login, then install the chat-list observer, retrying until the
/// conversation list actually exists (the UI keeps loading for a moment
/// after the main view appears).
async fn watch_after_login(
    login: Arc<login::ProductionLogin>,
    watcher: ChatEventWatcher,
    queue: Arc<ConversationQueue>,
) {
    let proof = login.await_login().await;
    tracing::info!(
        proof = ?proof.screenshot_path,
        logged_in_at = %proof.logged_in_at,
        "login complete; arming the watcher"
    );

    loop {
        let queue = queue.clone();
        let admitted = watcher
            .start(move |event| queue.enqueue(event.conversation_id, event.is_group))
            .await;
        match admitted {
            Ok(true) => break,
            Ok(false) => {
                tracing::debug!("chat list not ready; retrying observer install");
            }
            Err(e) => {
                tracing::warn!(error = %e, "observer install failed; retrying");
            }
        }
        tokio::time::sleep(WATCH_RETRY).await;
    }
}
