//! Gateway HTTP server: health check, outgoing webhook, slash commands, stand-up alert.

use crate::config::{self, Config};
use crate::gateway::forms::{
    token_matches, CommandForm, HookForm, VOTE_COMMAND, WHATTHECOMMIT_COMMAND,
};
use crate::responder::{HookMessage, HttpQuoteSource, QuoteSource, Responder, SeededRandom};
use crate::slack::SlackClient;
use crate::vote::{VoteCommand, VoteService, VoteStore};
use crate::worker::{ApiCaller, OutboundTask, TaskContext, TaskQueue, WorkerPool};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const STANDUP_TEXT: &str = "stand up";

/// Shared state for gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub port: u16,
    pub hook_token: Option<String>,
    pub command_tokens: Arc<HashMap<String, String>>,
    pub standup_channel: String,
    pub responder: Arc<Responder>,
    pub votes: Arc<VoteService>,
    pub quotes: Arc<dyn QuoteSource>,
    pub tasks: TaskQueue,
    /// Cancelled on shutdown; detached reply tasks stop waiting on their delays.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// Wire the gateway around an API caller: spawns the worker pool and builds the vote service.
    pub fn build(
        config: &Config,
        port: u16,
        responder: Arc<Responder>,
        quotes: Arc<dyn QuoteSource>,
        caller: Arc<dyn ApiCaller>,
        shutdown: CancellationToken,
    ) -> (Self, WorkerPool) {
        let (tasks, pool) = WorkerPool::spawn(config.hook.workers, caller, shutdown.clone());
        let votes = Arc::new(VoteService::new(VoteStore::new(), tasks.clone()));
        let state = Self {
            port,
            hook_token: config::resolve_hook_token(config),
            command_tokens: Arc::new(config.hook.command_tokens.clone()),
            standup_channel: config.hook.standup_channel.clone(),
            responder,
            votes,
            quotes,
            tasks,
            shutdown,
        };
        (state, pool)
    }

    fn command_allowed(&self, command: &str, token: &str) -> bool {
        token_matches(self.command_tokens.get(command).map(String::as_str), token)
    }
}

/// GET / only. Used on its own by the RTM bot.
pub fn health_router(port: u16) -> Router {
    Router::new().route("/", get(move || health_http(port)))
}

pub fn build_router(state: GatewayState) -> Router {
    let routes: Router = Router::new()
        .route("/hook", post(hook))
        .route("/cmds/vote", post(vote))
        .route("/cmds/whatthecommit", get(whatthecommit).post(whatthecommit))
        .route("/alerts/standup", post(standup))
        .with_state(state.clone());
    health_router(state.port).merge(routes)
}

/// Serve `router` on `listener` until `signal` completes.
pub async fn serve<F>(listener: TcpListener, router: Router, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await
        .context("gateway server exited")
}

pub async fn bind(bind: &str, port: u16) -> Result<TcpListener> {
    let bind_addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    Ok(listener)
}

/// Start the webhook bot: verify credentials, start workers, and serve until shutdown (Ctrl+C or SIGTERM).
/// Listens on `config.gateway.port`; callers apply the PORT / `--port` overrides beforehand.
pub async fn run_gateway(config: Config) -> Result<()> {
    let token = config::resolve_slack_token(&config)?;
    let client = SlackClient::new(token, config.slack.api_base.clone());
    let self_id = client.auth_test().await.context("auth.test failed")?;
    log::info!("authenticated as {}", self_id);

    let quotes: Arc<dyn QuoteSource> =
        Arc::new(HttpQuoteSource::new(config.responder.quote_url.clone()));
    let responder = Arc::new(
        Responder::new(
            &self_id,
            &config.responder,
            Arc::new(SeededRandom::from_clock()),
            quotes.clone(),
        )
        .with_alias(config.slack.mention_alias.clone())
        .with_bot_name(config.slack.bot_name.clone()),
    );

    let port = config.gateway.port;
    let shutdown = CancellationToken::new();
    let (state, pool) = GatewayState::build(
        &config,
        port,
        responder,
        quotes,
        Arc::new(client),
        shutdown.clone(),
    );
    let listener = bind(&config.gateway.bind, port).await?;
    serve(listener, build_router(state), shutdown_signal(shutdown)).await?;

    pool.join().await;
    log::info!("gateway stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM, or when `token` is cancelled elsewhere. Cancels `token` either way.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("shutdown signal received"),
        _ = terminate => log::info!("shutdown signal received"),
        _ = token.cancelled() => {}
    }
    token.cancel();
}

/// GET / returns a simple health JSON.
async fn health_http(port: u16) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": port,
    }))
}

/// POST /hook: outgoing webhook. Replies are posted through the worker pool; the HTTP response is empty.
async fn hook(State(state): State<GatewayState>, Form(form): Form<HookForm>) -> StatusCode {
    if !token_matches(state.hook_token.as_deref(), &form.token) {
        log::warn!("hook: rejected call with bad token from {}", form.user_name);
        return StatusCode::FORBIDDEN;
    }
    let ctx = TaskContext::new();
    log::info!(
        "[{}] hook: {} in {}: {}",
        ctx.request_id,
        form.user_name,
        form.channel_id,
        form.text
    );
    let msg = HookMessage {
        channel: form.channel_id,
        user_id: form.user_id,
        text: form.text,
    };
    tokio::spawn(async move {
        let replies = state.responder.respond_to_hook(&msg).await;
        for out in replies {
            if !out.delay.is_zero() {
                tokio::select! {
                    _ = state.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(out.delay) => {}
                }
            }
            let task = OutboundTask::post_message(&ctx, &out.reply.channel, &out.reply.text);
            if !state.tasks.push(task) {
                return;
            }
        }
    });
    StatusCode::OK
}

/// POST /cmds/vote: the outcome text is the command's response.
async fn vote(State(state): State<GatewayState>, Form(form): Form<CommandForm>) -> Response {
    if !state.command_allowed(VOTE_COMMAND, &form.token) {
        log::warn!("vote: rejected call with bad token from {}", form.user_name);
        return StatusCode::FORBIDDEN.into_response();
    }
    let cmd = VoteCommand {
        channel: form.channel_id,
        user_id: form.user_id,
        user_name: form.user_name,
        text: form.text,
    };
    state
        .votes
        .handle(&cmd, &TaskContext::new())
        .to_string()
        .into_response()
}

/// GET|POST /cmds/whatthecommit: one quote as plain text. POST is a slash command and must carry its token.
async fn whatthecommit(
    State(state): State<GatewayState>,
    method: Method,
    Form(form): Form<CommandForm>,
) -> Response {
    if method == Method::POST && !state.command_allowed(WHATTHECOMMIT_COMMAND, &form.token) {
        log::warn!("whatthecommit: rejected call with bad token from {}", form.user_name);
        return StatusCode::FORBIDDEN.into_response();
    }
    state.quotes.fetch().await.into_response()
}

/// POST /alerts/standup: remind the stand-up channel.
async fn standup(State(state): State<GatewayState>) -> StatusCode {
    let ctx = TaskContext::new();
    let channel = format!("#{}", state.standup_channel.trim_start_matches('#'));
    log::info!("[{}] standup alert to {}", ctx.request_id, channel);
    let task = OutboundTask::post_message(&ctx, &channel, STANDUP_TEXT).not_as_user();
    if state.tasks.push(task) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
