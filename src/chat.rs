//! Selector-level binding to the chat UI
//!
//! `WebChatPage` is the concrete surface handed to the login machine and the
//! conversation queue. It owns every CSS selector and in-page script, so a
//! chat-side markup change lands here and nowhere else.

use crate::browser::{BrowserError, BrowserSession};
use crate::login::LoginSurface;
use crate::queue::ChatSurface;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One transcript entry, in natural DOM order (oldest first). `sender` is
/// the literal `"self"` for outgoing messages, a display name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

/// Selectors for the chat surface.
pub mod selectors {
    /// Marker that the main conversation view is loaded (logged in)
    pub const MAIN_VIEW: &str = "div[role=\"textbox\"]";
    /// The login QR code canvas
    pub const QR_CANVAS: &str = "canvas";
    /// Conversation-list container the watcher observes
    pub const CHAT_LIST: &str = "div[aria-label=\"Chat list\"]";
    /// Message composer (the search box is also a textbox; exclude it)
    pub const MESSAGE_INPUT: &str =
        "div[contenteditable=\"true\"][role=\"textbox\"]:not([aria-label*=\"Search\"])";
}

/// Bounded wait for the message composer before a send is abandoned
const INPUT_WAIT: Duration = Duration::from_secs(10);

/// The QR canvas renders within seconds normally; this inner wait is only a
/// backstop — the login machine applies the real startup window.
const QR_RENDER_WAIT: Duration = Duration::from_secs(600);

/// Selector for a conversation row by its display title.
fn conversation_selector(title: &str) -> String {
    let escaped = title.replace('\\', "\\\\").replace('"', "\\\"");
    format!("span[title=\"{escaped}\"]")
}

/// Extracts the open conversation's transcript as
/// `[{sender, text, timestamp}]`. Sender and timestamp come from the
/// bubble's pre-plain-text attribute, e.g. `"[12:01, 1/2/2026] Alice: "`.
const TRANSCRIPT_JS: &str = r#"(() => {
  const rows = Array.from(document.querySelectorAll('#main div[role="row"]'));
  const out = [];
  for (const row of rows) {
    const bubble = row.querySelector('div.message-in, div.message-out');
    if (!bubble) continue;
    const textEl = bubble.querySelector('span.selectable-text');
    if (!textEl) continue;
    const pre = bubble.querySelector('div[data-pre-plain-text]');
    const meta = pre ? (pre.getAttribute('data-pre-plain-text') || '') : '';
    const m = meta.match(/^\[([^\]]*)\]\s*(.*?):\s*$/);
    out.push({
      sender: bubble.classList.contains('message-out') ? 'self' : (m ? m[2].trim() : 'them'),
      text: textEl.innerText,
      timestamp: m ? m[1].trim() : ''
    });
  }
  return out;
})()"#;

fn parse_transcript(value: serde_json::Value) -> Result<Vec<Message>, BrowserError> {
    serde_json::from_value(value)
        .map_err(|e| BrowserError::Operation(format!("unparseable transcript: {e}")))
}

/// The concrete chat surface bound to the shared browser session.
pub struct WebChatPage {
    session: Arc<BrowserSession>,
    chat_url: String,
}

impl WebChatPage {
    pub fn new(session: Arc<BrowserSession>, chat_url: String) -> Self {
        Self { session, chat_url }
    }
}

/// Sleep `base` plus a uniform jitter, so automated actions don't land on a
/// metronome.
async fn human_pause(base_ms: u64, jitter_ms: u64) {
    let jitter = rand::thread_rng().gen_range(0..jitter_ms);
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}

#[async_trait]
impl LoginSurface for WebChatPage {
    async fn main_view_present(&self) -> bool {
        self.session.exists(selectors::MAIN_VIEW).await
    }

    async fn qr_image(&self) -> Result<Vec<u8>, BrowserError> {
        self.session
            .wait_for_element(selectors::QR_CANVAS, QR_RENDER_WAIT)
            .await?;
        self.session.screenshot_element(selectors::QR_CANVAS).await
    }

    async fn persist_session(&self, path: &Path) -> Result<(), BrowserError> {
        self.session.persist_session(path).await
    }

    async fn proof_screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        self.session.screenshot_page(path).await
    }

    async fn reset_to_login(&self) -> Result<(), BrowserError> {
        self.session.navigate(&self.chat_url).await
    }
}

#[async_trait]
impl ChatSurface for WebChatPage {
    async fn open_conversation(&self, title: &str) -> Result<bool, BrowserError> {
        let selector = conversation_selector(title);
        if !self.session.exists(&selector).await {
            return Ok(false);
        }
        self.session.click(&selector).await?;
        human_pause(1200, 800).await;
        tracing::debug!(conversation = %title, "conversation opened");
        Ok(true)
    }

    async fn extract_transcript(&self) -> Result<Vec<Message>, BrowserError> {
        let value = self.session.evaluate(TRANSCRIPT_JS).await?;
        parse_transcript(value)
    }

    async fn send_reply(&self, text: &str) -> Result<(), BrowserError> {
        self.session
            .wait_for_element(selectors::MESSAGE_INPUT, INPUT_WAIT)
            .await?;
        self.session.click(selectors::MESSAGE_INPUT).await?;

        // Line by line with soft newlines, one hard Enter to submit.
        for line in text.lines() {
            self.session
                .type_into(selectors::MESSAGE_INPUT, line)
                .await?;
            self.session.insert_text("\n").await?;
        }
        self.session
            .press_key(selectors::MESSAGE_INPUT, "Enter")
            .await?;

        human_pause(1000, 2000).await;
        Ok(())
    }
}
