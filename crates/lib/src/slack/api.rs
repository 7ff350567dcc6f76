//! Slack Web API: rtm.start handshake, auth.test, and form-encoded method calls.

use async_trait::async_trait;
use serde::Deserialize;

use crate::worker::{ApiCaller, Form};

pub const RTM_START: &str = "rtm.start";
pub const AUTH_TEST: &str = "auth.test";
pub const CHAT_POST_MESSAGE: &str = "chat.postMessage";

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
    #[error("slack response missing {0}")]
    MissingField(&'static str),
    #[error("slack response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rtm websocket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The `{ "ok": bool, "error": "..." }` envelope every Web API response carries.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    error: Option<String>,
}

/// Check the envelope of a decoded response body.
pub fn ensure_ok(body: &serde_json::Value) -> Result<(), SlackError> {
    let env: Envelope = serde_json::from_value(body.clone())?;
    if env.ok {
        Ok(())
    } else {
        Err(SlackError::Api(
            env.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}

/// Result of the RTM handshake: websocket URL and the bot's own user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmSession {
    pub url: String,
    pub self_id: String,
}

/// Extract `url` and `self.id` from an rtm.start response.
pub fn parse_rtm_start(body: &serde_json::Value) -> Result<RtmSession, SlackError> {
    ensure_ok(body)?;
    let url = body
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or(SlackError::MissingField("url"))?;
    let self_id = body
        .get("self")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .ok_or(SlackError::MissingField("self.id"))?;
    Ok(RtmSession {
        url: url.to_string(),
        self_id: self_id.to_string(),
    })
}

/// Extract `user_id` from an auth.test response.
pub fn parse_auth_test(body: &serde_json::Value) -> Result<String, SlackError> {
    ensure_ok(body)?;
    body.get("user_id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or(SlackError::MissingField("user_id"))
}

/// Slack Web API client. Attaches the bot token to every call.
#[derive(Clone)]
pub struct SlackClient {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// POST a form to `method` with only the token attached (no `as_user`).
    async fn request(&self, method: &str, form: &[(String, String)]) -> Result<serde_json::Value, SlackError> {
        let mut params: Vec<(&str, &str)> = vec![("token", self.token.as_str())];
        params.extend(form.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let res = self
            .client
            .post(self.api_url(method))
            .form(&params)
            .send()
            .await?;
        let body = res.text().await?;
        let json: serde_json::Value = serde_json::from_str(&body)?;
        log::debug!("slack {} -> {}", method, json);
        Ok(json)
    }

    /// rtm.start: returns the websocket URL and the bot's user id.
    pub async fn rtm_start(&self) -> Result<RtmSession, SlackError> {
        let body = self.request(RTM_START, &[]).await?;
        parse_rtm_start(&body)
    }

    /// auth.test: returns the bot's user id.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let body = self.request(AUTH_TEST, &[]).await?;
        parse_auth_test(&body)
    }

    /// Call a Web API method as the bot user. `as_user=true` is added unless the form already sets it.
    pub async fn post_form(&self, method: &str, form: &Form) -> Result<serde_json::Value, SlackError> {
        let mut fields: Vec<(String, String)> =
            form.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !form.contains_key("as_user") {
            fields.push(("as_user".to_string(), "true".to_string()));
        }
        let body = self.request(method, &fields).await?;
        ensure_ok(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl ApiCaller for SlackClient {
    async fn call(&self, method: &str, form: &Form) -> Result<(), String> {
        self.post_form(method, form)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    /// Serves a fake Web API that echoes every posted form field back inside an ok envelope.
    async fn echo_api() -> String {
        async fn echo(axum::Form(form): axum::Form<HashMap<String, String>>) -> Json<serde_json::Value> {
            let mut body = json!({ "ok": true });
            for (k, v) in form {
                body[k] = json!(v);
            }
            Json(body)
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/chat.postMessage", post(echo));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn rtm_start_extracts_url_and_self() {
        let body = json!({ "ok": true, "url": "wss://example/ws", "self": { "id": "UBOT", "name": "hehe" } });
        let session = parse_rtm_start(&body).unwrap();
        assert_eq!(session.url, "wss://example/ws");
        assert_eq!(session.self_id, "UBOT");
    }

    #[test]
    fn rtm_start_without_self_fails() {
        let body = json!({ "ok": true, "url": "wss://example/ws" });
        assert!(matches!(
            parse_rtm_start(&body),
            Err(SlackError::MissingField("self.id"))
        ));
    }

    #[test]
    fn error_envelope_carries_message() {
        let body = json!({ "ok": false, "error": "invalid_auth" });
        match parse_rtm_start(&body) {
            Err(SlackError::Api(e)) => assert_eq!(e, "invalid_auth"),
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn envelope_without_ok_is_failure() {
        assert!(matches!(ensure_ok(&json!({})), Err(SlackError::Api(_))));
    }

    #[test]
    fn auth_test_reads_user_id() {
        let body = json!({ "ok": true, "user_id": "UBOT", "user": "hehe" });
        assert_eq!(parse_auth_test(&body).unwrap(), "UBOT");
    }

    #[test]
    fn api_base_trailing_slash_is_trimmed() {
        let client = SlackClient::new("t", "https://slack.com/api/");
        assert_eq!(client.api_url("rtm.start"), "https://slack.com/api/rtm.start");
    }

    #[tokio::test]
    async fn post_form_sends_token_and_posts_as_user() {
        let client = SlackClient::new("xoxb-1", echo_api().await);
        let mut form = Form::new();
        form.insert("channel".into(), "C1".into());
        form.insert("text".into(), "hi".into());

        let body = client.post_form(CHAT_POST_MESSAGE, &form).await.unwrap();
        assert_eq!(body["token"], "xoxb-1");
        assert_eq!(body["as_user"], "true");
        assert_eq!(body["text"], "hi");

        form.insert("as_user".into(), "false".into());
        let body = client.post_form(CHAT_POST_MESSAGE, &form).await.unwrap();
        assert_eq!(body["as_user"], "false");
    }
}
