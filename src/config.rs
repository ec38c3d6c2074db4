//! Process configuration
//!
//! All knobs come from the environment with working defaults, so a bare
//! `chatghost` invocation brings up a usable instance.

use std::path::PathBuf;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the operator HTTP surface
    pub port: u16,
    /// URL of the web chat application
    pub chat_url: String,
    /// Where the serialized session blob lives
    pub session_file: PathBuf,
    /// Directory for login-proof screenshots
    pub proof_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let state_dir = format!("{home}/.chatghost");

        let port = std::env::var("CHATGHOST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let chat_url = std::env::var("CHATGHOST_CHAT_URL")
            .unwrap_or_else(|_| "https://web.whatsapp.com".to_string());

        let session_file = std::env::var("CHATGHOST_SESSION_FILE")
            .map_or_else(|_| PathBuf::from(format!("{state_dir}/session.json")), PathBuf::from);

        let proof_dir = std::env::var("CHATGHOST_PROOF_DIR")
            .map_or_else(|_| PathBuf::from(format!("{state_dir}/proof")), PathBuf::from);

        Self {
            port,
            chat_url,
            session_file,
            proof_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        // Not touching the env here; just check the fallback construction.
        let config = Config::from_env();
        assert!(!config.chat_url.is_empty());
        assert!(config.session_file.to_string_lossy().ends_with(".json"));
        assert!(config.port > 0);
    }
}
