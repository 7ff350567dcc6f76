//! Form payloads Slack posts to the gateway.

use serde::Deserialize;

pub const VOTE_COMMAND: &str = "/vote";
pub const WHATTHECOMMIT_COMMAND: &str = "/whatthecommit";

/// Outgoing webhook call. Only the fields the bot reads; Slack sends more.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookForm {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub text: String,
}

/// Slash command invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandForm {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub text: String,
}

/// A request token is accepted only when a non-empty token is configured and matches exactly.
pub fn token_matches(expected: Option<&str>, provided: &str) -> bool {
    matches!(expected, Some(e) if !e.is_empty() && e == provided)
}
