//! Slack: Web API client, RTM websocket loops, and the event/reply types they carry.

pub mod api;
pub mod rtm;
pub mod types;

pub use api::{RtmSession, SlackClient, SlackError};
pub use types::{Event, FileObject, OutboundFrame, Reply, TsClock};
