//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relaybot/config.json`) and environment.
//! Every field has a default so an empty `{}` file (or no file at all) is a valid config.

use anyhow::{Context, Result};
use chrono::{FixedOffset, Local, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings (webhook gateway, health endpoint).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Slack credentials and bot identity.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Outgoing-webhook and slash command settings.
    #[serde(default)]
    pub hook: HookConfig,

    /// Reply generation settings.
    #[serde(default)]
    pub responder: ResponderConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8080). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Slack settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot token. Overridden by SLACK_TOKEN env.
    pub token: Option<String>,
    /// File whose first line is the bot token; used when neither env nor `token` is set.
    pub credentials_file: Option<PathBuf>,
    /// Web API base URL (default "https://slack.com/api").
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bot user name; the webhook variant treats a message containing it as a direct address.
    pub bot_name: Option<String>,
    /// Extra literal that counts as addressing the bot (besides `<@BOTID>`), e.g. "@hehe".
    pub mention_alias: Option<String>,
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            credentials_file: None,
            api_base: default_api_base(),
            bot_name: None,
            mention_alias: None,
        }
    }
}

/// Outgoing webhook and slash commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    /// Shared secret of the outgoing webhook. Overridden by RELAYBOT_HOOK_TOKEN env.
    pub token: Option<String>,
    /// Slash command name (e.g. "/vote") -> verification token.
    #[serde(default)]
    pub command_tokens: HashMap<String, String>,
    /// Number of workers draining the outbound task queue (default 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Channel that receives the stand-up alert (default "general").
    #[serde(default = "default_standup_channel")]
    pub standup_channel: String,
}

fn default_workers() -> usize {
    4
}

fn default_standup_channel() -> String {
    "general".to_string()
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            token: None,
            command_tokens: HashMap::new(),
            workers: default_workers(),
            standup_channel: default_standup_channel(),
        }
    }
}

/// Inclusive hour range (0-23) during which the bot claims to be commuting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour <= self.end
    }
}

impl Default for HourWindow {
    fn default() -> Self {
        Self { start: 18, end: 20 }
    }
}

/// Reply generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponderConfig {
    /// Hours (inclusive) that add the commuting clause to a stalling reply. `{ "start": 7, "end": 23 }` reproduces "after 6 o'clock".
    #[serde(default)]
    pub commute_hours: HourWindow,
    /// Time zone for the commute window as minutes east of UTC. When absent, the host's local time is used.
    pub utc_offset_minutes: Option<i32>,
    /// Pause between the two stalling replies in milliseconds (default 1000).
    #[serde(default = "default_stall_delay_ms")]
    pub stall_delay_ms: u64,
    /// Plain-text quote service (default whatthecommit).
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
}

fn default_stall_delay_ms() -> u64 {
    1000
}

fn default_quote_url() -> String {
    "http://whatthecommit.com/index.txt".to_string()
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            commute_hours: HourWindow::default(),
            utc_offset_minutes: None,
            stall_delay_ms: default_stall_delay_ms(),
            quote_url: default_quote_url(),
        }
    }
}

impl ResponderConfig {
    pub fn stall_delay(&self) -> Duration {
        Duration::from_millis(self.stall_delay_ms)
    }

    /// Current hour of day in the configured zone.
    pub fn current_hour(&self) -> u32 {
        let offset = self
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .unwrap_or_else(|| Local::now().offset().fix());
        Utc::now().with_timezone(&offset).hour()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Read the first line of a credentials file.
pub fn read_token_file(path: &Path) -> Result<String> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading credentials from {}", path.display()))?;
    let token = s.lines().next().unwrap_or("").trim().to_string();
    if token.is_empty() {
        anyhow::bail!("credentials file {} is empty", path.display());
    }
    Ok(token)
}

/// Resolve the Slack token: env SLACK_TOKEN, then config, then the credentials file.
pub fn resolve_slack_token(config: &Config) -> Result<String> {
    if let Some(t) = non_empty_env("SLACK_TOKEN").or_else(|| non_empty(config.slack.token.as_ref())) {
        return Ok(t);
    }
    match &config.slack.credentials_file {
        Some(path) => read_token_file(path),
        None => anyhow::bail!(
            "no Slack token configured (set SLACK_TOKEN, slack.token or slack.credentialsFile)"
        ),
    }
}

/// Resolve the outgoing webhook token: env RELAYBOT_HOOK_TOKEN overrides config.
pub fn resolve_hook_token(config: &Config) -> Option<String> {
    non_empty_env("RELAYBOT_HOOK_TOKEN").or_else(|| non_empty(config.hook.token.as_ref()))
}

/// Resolve the HTTP port: env PORT overrides config.
pub fn resolve_port(config: &Config) -> u16 {
    non_empty_env("PORT")
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.gateway.port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAYBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".relaybot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, RELAYBOT_CONFIG_PATH, or the default path. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
