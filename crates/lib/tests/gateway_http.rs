//! Integration test: serve the gateway on a free port with a recording API caller and drive it
//! over HTTP. Nothing here talks to Slack.

use async_trait::async_trait;
use lib::config::Config;
use lib::gateway::{self, GatewayState};
use lib::responder::{QuoteSource, Responder, SeededRandom};
use lib::worker::{ApiCaller, Form, WorkerPool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, Form)>>,
}

impl Recorder {
    fn calls(&self) -> Vec<(String, Form)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiCaller for Recorder {
    async fn call(&self, method: &str, form: &Form) -> Result<(), String> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), form.clone()));
        Ok(())
    }
}

struct FixedQuote;

#[async_trait]
impl QuoteSource for FixedQuote {
    async fn fetch(&self) -> String {
        "Fixed a typo".to_string()
    }
}

struct Harness {
    base: String,
    port: u16,
    recorder: Arc<Recorder>,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
    pool: WorkerPool,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let mut config = Config::default();
        config.hook.token = Some("hook-secret".to_string());
        config
            .hook
            .command_tokens
            .insert("/vote".to_string(), "vote-secret".to_string());
        config
            .hook
            .command_tokens
            .insert("/whatthecommit".to_string(), "commit-secret".to_string());
        config.hook.workers = 2;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind free port");
        let port = listener.local_addr().expect("local_addr").port();

        let quotes: Arc<dyn QuoteSource> = Arc::new(FixedQuote);
        let responder = Arc::new(
            Responder::new(
                "UBOT",
                &config.responder,
                Arc::new(SeededRandom::with_seed(9)),
                quotes.clone(),
            )
            .with_bot_name(Some("hehe".to_string())),
        );
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let (state, pool) = GatewayState::build(
            &config,
            port,
            responder,
            quotes,
            recorder.clone(),
            shutdown.clone(),
        );
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(gateway::serve(
                listener,
                gateway::build_router(state),
                async move { shutdown.cancelled().await },
            ))
        };
        Self {
            base: format!("http://127.0.0.1:{}", port),
            port,
            recorder,
            shutdown,
            server,
            pool,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> (u16, String) {
        let res = self
            .client
            .post(format!("{}{}", self.base, path))
            .form(form)
            .send()
            .await
            .expect("request");
        let status = res.status().as_u16();
        (status, res.text().await.expect("body"))
    }

    async fn wait_for_calls(&self, n: usize) -> Vec<(String, Form)> {
        for _ in 0..100 {
            let calls = self.recorder.calls();
            if calls.len() >= n {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "expected {} outbound calls within 5s, got {:?}",
            n,
            self.recorder.calls()
        );
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.expect("join").expect("serve");
        self.pool.join().await;
    }
}

fn text_of(call: &(String, Form)) -> &str {
    call.1.get("text").map(String::as_str).unwrap_or("")
}

#[tokio::test]
async fn health_reports_running_and_port() {
    let h = Harness::start().await;
    let json: serde_json::Value = h
        .client
        .get(format!("{}/", h.base))
        .send()
        .await
        .expect("GET /")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(h.port as u64));
    h.stop().await;
}

#[tokio::test]
async fn vote_command_runs_a_poll() {
    let h = Harness::start().await;
    let vote = |token: &'static str, user_id: &'static str, user_name: &'static str, text: &'static str| {
        [
            ("token", token),
            ("command", "/vote"),
            ("channel_id", "C1"),
            ("user_id", user_id),
            ("user_name", user_name),
            ("text", text),
        ]
    };

    let (status, _) = h.post("/cmds/vote", &vote("wrong", "U1", "ann", "start")).await;
    assert_eq!(status, 403);

    let (status, body) = h.post("/cmds/vote", &vote("vote-secret", "U1", "ann", "start")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "vote starts now");

    let (_, body) = h.post("/cmds/vote", &vote("vote-secret", "U2", "alice", "red")).await;
    assert_eq!(body, "Result:\nred: [alice]\n");
    let (_, body) = h.post("/cmds/vote", &vote("vote-secret", "U2", "alice", "blue")).await;
    assert_eq!(body, "Result:\nred: [alice]\n");
    let (_, body) = h.post("/cmds/vote", &vote("vote-secret", "U3", "bob", "red")).await;
    assert_eq!(body, "Result:\nred: [alice bob]\n");

    let (_, body) = h.post("/cmds/vote", &vote("vote-secret", "U1", "ann", "done")).await;
    assert_eq!(body, "vote ends");
    let (_, body) = h.post("/cmds/vote", &vote("vote-secret", "U1", "ann", "done")).await;
    assert_eq!(body, "Not voting");

    let calls = h.wait_for_calls(2).await;
    let texts: Vec<&str> = calls.iter().map(text_of).collect();
    assert!(texts.contains(&"<@U1> just starts a vote! Type `/vote [option]` to vote."));
    assert!(texts.contains(&"Result:\nred: [alice bob]\n"));
    assert!(calls.iter().all(|(m, f)| m == "chat.postMessage"
        && f.get("channel").map(String::as_str) == Some("C1")));
    h.stop().await;
}

#[tokio::test]
async fn hook_checks_token_and_posts_reply() {
    let h = Harness::start().await;
    let (status, _) = h
        .post("/hook", &[("token", "nope"), ("channel_id", "C9"), ("text", "谢谢")])
        .await;
    assert_eq!(status, 403);

    let (status, _) = h
        .post(
            "/hook",
            &[
                ("token", "hook-secret"),
                ("channel_id", "C9"),
                ("user_id", "U2"),
                ("user_name", "ann"),
                ("text", "谢谢"),
            ],
        )
        .await;
    assert_eq!(status, 200);
    let calls = h.wait_for_calls(1).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(text_of(&calls[0]), "不客气 :blush:");
    assert_eq!(calls[0].1.get("channel").map(String::as_str), Some("C9"));
    h.stop().await;
}

#[tokio::test]
async fn hook_commit_posts_quote() {
    let h = Harness::start().await;
    let (status, _) = h
        .post(
            "/hook",
            &[("token", "hook-secret"), ("channel_id", "C9"), ("text", "any commit ideas")],
        )
        .await;
    assert_eq!(status, 200);
    let calls = h.wait_for_calls(1).await;
    assert_eq!(text_of(&calls[0]), "Fixed a typo");
    h.stop().await;
}

#[tokio::test]
async fn whatthecommit_get_is_open_post_needs_token() {
    let h = Harness::start().await;
    let body = h
        .client
        .get(format!("{}/cmds/whatthecommit", h.base))
        .send()
        .await
        .expect("GET")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "Fixed a typo");

    let (status, _) = h.post("/cmds/whatthecommit", &[("token", "bad")]).await;
    assert_eq!(status, 403);
    let (status, body) = h
        .post("/cmds/whatthecommit", &[("token", "commit-secret"), ("command", "/whatthecommit")])
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, "Fixed a typo");
    h.stop().await;
}

#[tokio::test]
async fn standup_alert_posts_to_general() {
    let h = Harness::start().await;
    let (status, _) = h.post("/alerts/standup", &[]).await;
    assert_eq!(status, 200);
    let calls = h.wait_for_calls(1).await;
    assert_eq!(text_of(&calls[0]), "stand up");
    assert_eq!(calls[0].1.get("channel").map(String::as_str), Some("#general"));
    assert_eq!(calls[0].1.get("as_user").map(String::as_str), Some("false"));
    h.stop().await;
}
