//! Google Gemini oracle implementation

use super::{OracleError, ReplyOracle};
use crate::chat::Message;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard cap on one oracle round-trip. The queue itself applies no timeout,
/// so this is the only bound between a hung upstream and a stalled worker.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Oracle configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: Option<String>,
    pub model: String,
}

impl OracleConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("CHATGHOST_ORACLE_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Gemini-backed reply oracle.
pub struct GeminiOracle {
    client: Client,
    config: OracleConfig,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(config: OracleConfig) -> Self {
        let base_url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            config.model
        );

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            base_url,
        }
    }

    fn translate_request(transcript: &[Message], is_group: bool) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: render_transcript(transcript),
                }],
            }],
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: render_instructions(is_group),
                }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(512),
            }),
        }
    }

    fn normalize_response(resp: GeminiResponse) -> Result<String, OracleError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::unknown("No candidates in response"))?;

        let text = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(text)
    }
}

#[async_trait]
impl ReplyOracle for GeminiOracle {
    async fn reply(&self, transcript: &[Message], is_group: bool) -> Result<String, OracleError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(OracleError::auth("GEMINI_API_KEY not configured"));
        };

        let request = Self::translate_request(transcript, is_group);
        let url = format!("{}?key={}", self.base_url, api_key);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    OracleError::network(format!("Connection failed: {e}"))
                } else {
                    OracleError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(error_resp) = serde_json::from_str::<GeminiErrorResponse>(&body) {
                let message = error_resp.error.message;
                return Err(match status.as_u16() {
                    400 => OracleError::invalid_request(format!("Invalid request: {message}")),
                    401 | 403 => OracleError::auth(format!("Authentication failed: {message}")),
                    429 => OracleError::rate_limit(format!("Rate limit exceeded: {message}")),
                    500..=599 => OracleError::server_error(format!("Server error: {message}")),
                    _ => OracleError::unknown(format!("HTTP {status}: {message}")),
                });
            }
            return Err(OracleError::unknown(format!("HTTP {status} error: {body}")));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            OracleError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(gemini_response)
    }
}

fn render_transcript(transcript: &[Message]) -> String {
    let mut out = String::from("Current conversation, oldest first:\n");
    for msg in transcript {
        if msg.timestamp.is_empty() {
            out.push_str(&format!("{}: {}\n", msg.sender, msg.text));
        } else {
            out.push_str(&format!("[{}] {}: {}\n", msg.timestamp, msg.sender, msg.text));
        }
    }
    out
}

fn render_instructions(is_group: bool) -> String {
    let mut out = String::from(
        "You are covering for the account owner in a web chat. Write the next \
         outgoing message as they would: casual, concise, human. Messages from \
         the owner appear with sender \"self\"; do not repeat what was already \
         said. Never mention automation, assistants, or APIs. If no reply is \
         warranted, answer with exactly: skip",
    );
    if is_group {
        out.push_str(
            "\nThis is a group conversation. Reply only when the owner is \
             addressed directly; otherwise answer: skip",
        );
    }
    out
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Vec<Message> {
        vec![
            Message {
                sender: "Alice".to_string(),
                text: "hey".to_string(),
                timestamp: "12:01".to_string(),
            },
            Message {
                sender: "self".to_string(),
                text: "hi! what's up".to_string(),
                timestamp: "12:02".to_string(),
            },
        ]
    }

    #[test]
    fn request_wire_shape() {
        let request = GeminiOracle::translate_request(&transcript(), false);
        let value = serde_json::to_value(&request).unwrap();

        assert!(value.get("contents").is_some());
        assert!(value.get("systemInstruction").is_some());
        assert!(value.get("generationConfig").is_some());
        assert_eq!(value["contents"][0]["role"], "user");
        let user_text = value["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(user_text.contains("[12:01] Alice: hey"));
        assert!(user_text.contains("[12:02] self: hi! what's up"));
    }

    #[test]
    fn instructions_name_the_sentinel() {
        assert!(render_instructions(false).contains("skip"));
    }

    #[test]
    fn group_flag_changes_instructions() {
        let direct = render_instructions(false);
        let group = render_instructions(true);
        assert!(!direct.contains("group conversation"));
        assert!(group.contains("group conversation"));
    }

    #[test]
    fn response_text_is_joined() {
        let resp = GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![
                        GeminiPart {
                            text: "Sure, ".to_string(),
                        },
                        GeminiPart {
                            text: "on it!".to_string(),
                        },
                    ],
                },
            }],
        };
        assert_eq!(GeminiOracle::normalize_response(resp).unwrap(), "Sure, on it!");
    }

    #[test]
    fn missing_key_reads_as_unconfigured() {
        let config = OracleConfig {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
        };
        assert!(!config.is_configured());
    }
}
