//! Gateway: the HTTP side of the bot.
//!
//! One port serves the health check, the outgoing webhook and the slash commands. Handlers
//! answer right away; anything posted back to Slack goes through the worker pool.

mod forms;
mod server;

pub use forms::{CommandForm, HookForm, VOTE_COMMAND, WHATTHECOMMIT_COMMAND};
pub use server::{
    bind, build_router, health_router, run_gateway, serve, shutdown_signal, GatewayState,
    STANDUP_TEXT,
};
