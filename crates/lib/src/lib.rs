//! Relay bot core: Slack RTM transport, reply rules, vote state, webhook gateway and the
//! outbound worker pool, shared by the `relaybot` CLI.

pub mod config;
pub mod gateway;
pub mod relay;
pub mod responder;
pub mod slack;
pub mod vote;
pub mod worker;
