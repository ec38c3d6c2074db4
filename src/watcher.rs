//! Chat-list mutation watcher
//!
//! Converts UI mutations on the conversation list into a stream of
//! `ChatEvent`s. Detection runs in the page (a MutationObserver); events
//! cross into host code through a one-directional CDP binding. The host
//! side hands each event to the admission callback and returns immediately
//! — the queue, not the watcher, is the serialization point.

use crate::browser::{BrowserError, BrowserSession};
use crate::chat::selectors;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Host binding the in-page observer reports through
pub const BINDING_NAME: &str = "chatghostUnread";

/// One detected unread conversation. Two events for the same conversation
/// are distinct values; nothing here deduplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub conversation_id: String,
    pub is_group: bool,
    pub detected_at: DateTime<Utc>,
}

/// Observes insertions under the chat-list container. A node carrying an
/// unread badge resolves to its enclosing row; the row's title span (the
/// span whose text equals its own title attribute) names the conversation,
/// and a group icon on the row sets the flag. Rows without a resolvable
/// title are dropped.
const OBSERVER_JS: &str = r#"(() => {
  const chatList = document.querySelector('div[aria-label="Chat list"]');
  if (!chatList) return false;
  const observer = new MutationObserver((mutations) => {
    for (const mutation of mutations) {
      mutation.addedNodes.forEach((node) => {
        if (!(node instanceof HTMLElement)) return;
        const unread = node.querySelector('span[aria-label*="unread message"]');
        if (!unread) return;
        const row = unread.closest('div[role="row"]');
        if (!row) return;
        const titleSpan = Array.from(row.querySelectorAll('span[title]'))
          .find((span) => span.innerText === span.getAttribute('title'));
        if (!titleSpan) return;
        const isGroup = !!row.querySelector('span[data-icon="default-group"]');
        window.chatghostUnread(JSON.stringify({ title: titleSpan.innerText, isGroup }));
      });
    }
  });
  observer.observe(chatList, { childList: true, subtree: true });
  return true;
})()"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadPayload {
    title: String,
    #[serde(default)]
    is_group: bool,
}

/// Parse one binding payload into a `ChatEvent`. Unparseable payloads and
/// empty titles yield `None` — dropped, not retried.
fn parse_event_payload(payload: &str) -> Option<ChatEvent> {
    let parsed: UnreadPayload = serde_json::from_str(payload).ok()?;
    if parsed.title.is_empty() {
        return None;
    }
    Some(ChatEvent {
        conversation_id: parsed.title,
        is_group: parsed.is_group,
        detected_at: Utc::now(),
    })
}

pub struct ChatEventWatcher {
    session: Arc<BrowserSession>,
    installed: AtomicBool,
}

impl ChatEventWatcher {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self {
            session,
            installed: AtomicBool::new(false),
        }
    }

    /// Install the observer and begin feeding `on_event`.
    ///
    /// Idempotent: a second call while installed is a no-op returning true
    /// (re-installing would register duplicate observers and double every
    /// event). Returns false without installing when the chat-list
    /// container is not present yet; the caller retries after confirming
    /// the session is logged in.
    pub async fn start<F>(&self, on_event: F) -> Result<bool, BrowserError>
    where
        F: Fn(ChatEvent) + Send + Sync + 'static,
    {
        if self
            .installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("chat-list observer already installed");
            return Ok(true);
        }

        if !self.session.exists(selectors::CHAT_LIST).await {
            tracing::warn!("chat list not present; observer not installed");
            self.installed.store(false, Ordering::SeqCst);
            return Ok(false);
        }

        let install = async {
            let payloads = self.session.binding_payloads(BINDING_NAME).await?;
            self.session.install_binding(BINDING_NAME).await?;
            self.session.evaluate(OBSERVER_JS).await?;
            Ok::<_, BrowserError>(payloads)
        };

        let mut payloads = match install.await {
            Ok(p) => p,
            Err(e) => {
                self.installed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        tokio::spawn(async move {
            while let Some(payload) = payloads.next().await {
                match parse_event_payload(&payload) {
                    Some(event) => {
                        tracing::info!(
                            conversation = %event.conversation_id,
                            is_group = event.is_group,
                            detected_at = %event.detected_at,
                            "unread conversation detected"
                        );
                        on_event(event);
                    }
                    None => tracing::debug!(%payload, "dropping unparseable chat event"),
                }
            }
            tracing::debug!("chat event stream closed");
        });

        tracing::info!("observing chat list for unread conversations");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses_into_event() {
        let event = parse_event_payload(r#"{"title":"Alice","isGroup":false}"#).unwrap();
        assert_eq!(event.conversation_id, "Alice");
        assert!(!event.is_group);
    }

    #[test]
    fn group_flag_defaults_to_individual() {
        let event = parse_event_payload(r#"{"title":"Bob"}"#).unwrap();
        assert!(!event.is_group);
    }

    #[test]
    fn group_payload_is_flagged() {
        let event = parse_event_payload(r#"{"title":"Team","isGroup":true}"#).unwrap();
        assert!(event.is_group);
    }

    #[test]
    fn empty_title_is_dropped() {
        assert!(parse_event_payload(r#"{"title":"","isGroup":false}"#).is_none());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        assert!(parse_event_payload("not json").is_none());
        assert!(parse_event_payload(r#"{"isGroup":true}"#).is_none());
    }

    #[test]
    fn observer_script_reports_through_the_binding() {
        assert!(OBSERVER_JS.contains(BINDING_NAME));
        assert!(OBSERVER_JS.contains(selectors::CHAT_LIST));
    }

    #[test]
    fn two_events_for_one_conversation_are_distinct_values() {
        let a = parse_event_payload(r#"{"title":"Alice"}"#).unwrap();
        let b = parse_event_payload(r#"{"title":"Alice"}"#).unwrap();
        // Same conversation, separate events; identity is the value itself.
        assert_eq!(a.conversation_id, b.conversation_id);
    }
}
