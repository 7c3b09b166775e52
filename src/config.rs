use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::is_local_server_url;

/// Commands the chat endpoint understands.
pub const COMMANDS: &[&str] = &["code", "ask", "autopilot"];

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_url: String,
    pub model: Option<String>,
    pub command: String,
    pub working_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let server_url = std::env::var("TANDEM_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let model = std::env::var("TANDEM_MODEL").ok().and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });
        let command = std::env::var("TANDEM_COMMAND").unwrap_or_else(|_| "code".to_string());

        Ok(Self {
            server_url,
            model,
            command,
            working_dir: std::env::current_dir()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            bail!(
                "Invalid TANDEM_SERVER_URL '{}': expected http:// or https:// URL",
                self.server_url
            );
        }

        if !self.is_local_server() && self.server_url.starts_with("http://") {
            bail!(
                "Refusing plain-http transport for non-local server '{}'; use https://",
                self.server_url
            );
        }

        if !COMMANDS.contains(&self.command.as_str()) {
            bail!(
                "Unknown command '{}': expected one of {}",
                self.command,
                COMMANDS.join(", ")
            );
        }

        Ok(())
    }

    pub fn is_local_server(&self) -> bool {
        is_local_server_url(&self.server_url)
    }
}
