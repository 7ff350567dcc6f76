//! Per-channel polls driven by the `/vote` slash command.
//!
//! A channel is either idle or has exactly one active session. `start` opens a session, any
//! other text casts a vote for that option, `done` announces the tally and closes the session.
//! Every check-and-mutate runs under one process-wide lock, so a vote in one channel briefly
//! serializes with a `start` in another.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::responder::mention_of;
use crate::worker::{OutboundTask, TaskContext, TaskQueue};

pub const START_COMMAND: &str = "start";
pub const DONE_COMMAND: &str = "done";
/// The starter sending this sees the tally without it being counted as a vote.
pub const RESULT_COMMAND: &str = "result";

/// Option -> voter names in the order they voted. Options iterate in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(BTreeMap<String, Vec<String>>);

impl Tally {
    pub fn has_voted(&self, voter: &str) -> bool {
        self.0.values().any(|voters| voters.iter().any(|v| v == voter))
    }

    pub fn voters(&self, option: &str) -> &[String] {
        self.0.get(option).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Record `voter` for `option` unless they already voted for anything. Returns whether it counted.
    fn record(&mut self, voter: &str, option: &str) -> bool {
        if self.has_voted(voter) {
            return false;
        }
        self.0
            .entry(option.to_string())
            .or_default()
            .push(voter.to_string());
        true
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Result:")?;
        for (option, voters) in &self.0 {
            writeln!(f, "{}: [{}]", option, voters.join(" "))?;
        }
        Ok(())
    }
}

/// One active poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSession {
    pub starter: String,
    pub tally: Tally,
}

/// Active sessions keyed by channel, behind a single lock.
#[derive(Debug, Default)]
pub struct VoteStore {
    sessions: Mutex<HashMap<String, VoteSession>>,
}

impl VoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Snapshot of the channel's active session.
    pub fn get(&self, channel: &str) -> Option<VoteSession> {
        self.lock().get(channel).cloned()
    }

    /// Open a session. Returns false (and changes nothing) when one is already active.
    pub fn start(&self, channel: &str, starter: &str) -> bool {
        start_in(&mut self.lock(), channel, starter)
    }

    /// Cast a vote and return the tally afterwards, or None when the channel has no session.
    /// The starter asking for `result` and an empty option are not counted as votes.
    pub fn record_vote(
        &self,
        channel: &str,
        voter_id: &str,
        voter_name: &str,
        option: &str,
    ) -> Option<Tally> {
        record_in(&mut self.lock(), channel, voter_id, voter_name, option)
    }

    /// Close the session and return its final tally, or None when there was none.
    pub fn clear(&self, channel: &str) -> Option<Tally> {
        self.lock().remove(channel).map(|s| s.tally)
    }
}

type Sessions = HashMap<String, VoteSession>;

fn start_in(sessions: &mut Sessions, channel: &str, starter: &str) -> bool {
    if sessions.contains_key(channel) {
        return false;
    }
    sessions.insert(
        channel.to_string(),
        VoteSession {
            starter: starter.to_string(),
            tally: Tally::default(),
        },
    );
    true
}

fn record_in(
    sessions: &mut Sessions,
    channel: &str,
    voter_id: &str,
    voter_name: &str,
    option: &str,
) -> Option<Tally> {
    let session = sessions.get_mut(channel)?;
    let peek = option.is_empty() || (option == RESULT_COMMAND && voter_id == session.starter);
    if !peek && !session.tally.record(voter_name, option) {
        log::debug!("vote: {} already voted in {}", voter_name, channel);
    }
    Some(session.tally.clone())
}

/// What a `/vote` command did. Rendered as the text returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Started,
    AlreadyVoting,
    Tally(Tally),
    Ended(Tally),
    NotVoting,
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteOutcome::Started => write!(f, "vote starts now"),
            VoteOutcome::AlreadyVoting => write!(f, "we're voting"),
            VoteOutcome::Tally(t) => write!(f, "{}", t),
            VoteOutcome::Ended(_) => write!(f, "vote ends"),
            VoteOutcome::NotVoting => write!(f, "Not voting"),
        }
    }
}

/// A parsed `/vote` form.
#[derive(Debug, Clone)]
pub struct VoteCommand {
    pub channel: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
}

/// Parses `/vote` text, drives the store and announces starts and results to the channel.
pub struct VoteService {
    store: VoteStore,
    announce: TaskQueue,
}

impl VoteService {
    pub fn new(store: VoteStore, announce: TaskQueue) -> Self {
        Self { store, announce }
    }

    pub fn store(&self) -> &VoteStore {
        &self.store
    }

    /// Apply one command. Announcements are queued before the store lock is released, so they
    /// reach the queue in the same order as the transitions that caused them.
    pub fn handle(&self, cmd: &VoteCommand, ctx: &TaskContext) -> VoteOutcome {
        let text = cmd.text.trim();
        let mut sessions = self.store.lock();
        let outcome = match text {
            START_COMMAND => {
                if start_in(&mut sessions, &cmd.channel, &cmd.user_id) {
                    VoteOutcome::Started
                } else {
                    VoteOutcome::AlreadyVoting
                }
            }
            DONE_COMMAND => match sessions.remove(&cmd.channel) {
                Some(session) => VoteOutcome::Ended(session.tally),
                None => VoteOutcome::NotVoting,
            },
            option => match record_in(
                &mut sessions,
                &cmd.channel,
                &cmd.user_id,
                &cmd.user_name,
                option,
            ) {
                Some(tally) => VoteOutcome::Tally(tally),
                None => VoteOutcome::NotVoting,
            },
        };
        match &outcome {
            VoteOutcome::Started => {
                let text = format!(
                    "{} just starts a vote! Type `/vote [option]` to vote.",
                    mention_of(&cmd.user_id)
                );
                self.announce
                    .push(OutboundTask::post_message(ctx, &cmd.channel, &text));
            }
            VoteOutcome::Ended(tally) => {
                self.announce
                    .push(OutboundTask::post_message(ctx, &cmd.channel, &tally.to_string()));
            }
            _ => {}
        }
        drop(sessions);
        log::info!(
            "[{}] vote {} in {} by {}: {:?}",
            ctx.request_id,
            text,
            cmd.channel,
            cmd.user_name,
            outcome
        );
        outcome
    }
}
