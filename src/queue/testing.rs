//! Mock implementations for scheduler tests
//!
//! These mocks enable testing the worker without a browser or a network.

use super::ChatSurface;
use crate::browser::BrowserError;
use crate::chat::Message;
use crate::oracle::{OracleError, ReplyOracle};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock chat surface that records every call and tracks call overlap.
///
/// Each operation holds an "in flight" marker across an artificial delay;
/// if two tasks ever drive the surface concurrently, `max_in_flight`
/// exceeds one.
pub struct MockChatSurface {
    /// Artificial per-operation latency
    pub delay: Duration,
    /// Transcripts by conversation title
    transcripts: Mutex<HashMap<String, Vec<Message>>>,
    /// Titles whose row is absent from the current view
    missing: Mutex<HashSet<String>>,
    /// Titles whose open errors outright
    failing: Mutex<HashSet<String>>,
    /// Whether the composer is findable
    input_present: Mutex<bool>,
    /// Order of attempted opens
    pub opens: Mutex<Vec<String>>,
    /// Sends as (conversation, text), in order
    pub sends: Mutex<Vec<(String, String)>>,
    current: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockChatSurface {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            transcripts: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            input_present: Mutex::new(true),
            opens: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_transcript(self, title: impl Into<String>, transcript: Vec<Message>) -> Self {
        self.transcripts.lock().unwrap().insert(title.into(), transcript);
        self
    }

    /// Mark a title as absent from the current view (open returns false).
    pub fn with_missing(self, title: impl Into<String>) -> Self {
        self.missing.lock().unwrap().insert(title.into());
        self
    }

    /// Mark a title whose open fails with a driver error.
    pub fn with_failing(self, title: impl Into<String>) -> Self {
        self.failing.lock().unwrap().insert(title.into());
        self
    }

    /// Simulate a composer that never appears.
    pub fn without_input(self) -> Self {
        *self.input_present.lock().unwrap() = false;
        self
    }

    pub fn recorded_opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }

    pub fn recorded_sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn occupy(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockChatSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatSurface for MockChatSurface {
    async fn open_conversation(&self, title: &str) -> Result<bool, BrowserError> {
        self.opens.lock().unwrap().push(title.to_string());
        self.occupy().await;

        if self.failing.lock().unwrap().contains(title) {
            return Err(BrowserError::Operation(format!("open failed for {title}")));
        }
        if self.missing.lock().unwrap().contains(title) {
            return Ok(false);
        }
        *self.current.lock().unwrap() = Some(title.to_string());
        Ok(true)
    }

    async fn extract_transcript(&self) -> Result<Vec<Message>, BrowserError> {
        self.occupy().await;
        let current = self.current.lock().unwrap().clone();
        let title = current.ok_or_else(|| {
            BrowserError::Operation("no conversation open".to_string())
        })?;
        Ok(self
            .transcripts
            .lock()
            .unwrap()
            .get(&title)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_reply(&self, text: &str) -> Result<(), BrowserError> {
        self.occupy().await;
        if !*self.input_present.lock().unwrap() {
            return Err(BrowserError::ElementNotFound(
                "div[contenteditable=\"true\"]".to_string(),
            ));
        }
        let current = self.current.lock().unwrap().clone().unwrap_or_default();
        self.sends.lock().unwrap().push((current, text.to_string()));
        Ok(())
    }
}

/// Mock oracle that plays back queued responses, falling back to a default.
pub struct MockOracle {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    default_reply: Option<String>,
    /// Record of (transcript, is_group) per call
    pub calls: Mutex<Vec<(Vec<Message>, bool)>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply used whenever no queued response remains.
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    pub fn queue_reply(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn queue_error(&self, error: OracleError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_calls(&self) -> Vec<(Vec<Message>, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyOracle for MockOracle {
    async fn reply(&self, transcript: &[Message], is_group: bool) -> Result<String, OracleError> {
        self.calls
            .lock()
            .unwrap()
            .push((transcript.to_vec(), is_group));
        if let Some(queued) = self.responses.lock().unwrap().pop_front() {
            return queued;
        }
        match &self.default_reply {
            Some(text) => Ok(text.clone()),
            None => Err(OracleError::network("no mock response queued")),
        }
    }
}
