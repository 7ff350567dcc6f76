//! Message classification and reply generation.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! 1. events that are not messages are dropped
//! 2. a thank-you gets a fixed acknowledgement
//! 3. a direct address (mention as first or last field) gets a stalling reply when it is the
//!    mention alone, a commit-message quote when any other field mentions "commit", and a filler
//!    otherwise
//! 4. an image share gets a stalling reply
//!
//! The webhook variant has its own ordering, see [`Responder::respond_to_hook`].

pub mod quote;
pub mod random;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{HourWindow, ResponderConfig};
use crate::slack::{Event, Reply};

pub use quote::{HttpQuoteSource, QuoteSource};
pub use random::{Randomness, SeededRandom};

pub const THANKS_TOKEN: &str = "谢谢";
pub const THANKS_REPLY: &str = "不客气 :blush:";
pub const WAIT_TEXT: &str = "稍等";
pub const JUST_SAW_CLAUSE: &str = "，刚看到";
pub const COMMUTING_CLAUSE: &str = "，我在地铁上";
pub const FILLERS: [&str; 2] = ["呵呵", "嘻嘻"];
const COMMIT_TOKEN: &str = "commit";

/// A reply to emit after waiting `delay` (measured from the previous reply of the same response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub delay: Duration,
    pub reply: Reply,
}

impl Outgoing {
    pub fn now(reply: Reply) -> Self {
        Self {
            delay: Duration::ZERO,
            reply,
        }
    }
}

/// Fields of an outgoing-webhook call that the responder looks at.
#[derive(Debug, Clone, Default)]
pub struct HookMessage {
    pub channel: String,
    pub user_id: String,
    pub text: String,
}

/// `<@ID>`, the literal that addresses a user.
pub fn mention_of(user_id: &str) -> String {
    format!("<@{}>", user_id)
}

/// A 4-digit number and a mention of `user`, in random order.
pub fn code_with_at(random: &dyn Randomness, user: &str) -> String {
    let mention = mention_of(user);
    let number_first = random.flip();
    let code = random.below(9000) + 1000;
    if number_first {
        format!("{} {}", code, mention)
    } else {
        format!("{} {}", mention, code)
    }
}

/// First half of a stalling reply.
pub fn wait_text(just_saw: bool, commuting: bool) -> String {
    let mut text = WAIT_TEXT.to_string();
    if just_saw {
        text.push_str(JUST_SAW_CLAUSE);
    }
    if commuting {
        text.push_str(COMMUTING_CLAUSE);
    }
    text
}

type HourClock = Box<dyn Fn() -> u32 + Send + Sync>;

/// Decides what to say in reply to an event.
pub struct Responder {
    self_id: String,
    mention: String,
    alias: Option<String>,
    bot_name: Option<String>,
    commute_hours: HourWindow,
    stall_delay: Duration,
    hour: HourClock,
    random: Arc<dyn Randomness>,
    quotes: Arc<dyn QuoteSource>,
}

impl Responder {
    pub fn new(
        self_id: &str,
        config: &ResponderConfig,
        random: Arc<dyn Randomness>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Self {
        let clock_config = config.clone();
        Self {
            self_id: self_id.to_string(),
            mention: mention_of(self_id),
            alias: None,
            bot_name: None,
            commute_hours: config.commute_hours,
            stall_delay: config.stall_delay(),
            hour: Box::new(move || clock_config.current_hour()),
            random,
            quotes,
        }
    }

    /// Another literal (e.g. "@hehe") that addresses the bot like its mention does.
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.trim().is_empty());
        self
    }

    /// Bot user name; used by the webhook rules to detect that the bot is being talked to.
    pub fn with_bot_name(mut self, name: Option<String>) -> Self {
        self.bot_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Replace the hour-of-day source.
    pub fn with_clock(mut self, hour: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.hour = Box::new(hour);
        self
    }

    fn address_tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.mention.as_str()).chain(self.alias.as_deref())
    }

    /// The text starts or ends with an address token. A mention in the middle does not count.
    fn is_addressed(&self, text: &str) -> bool {
        self.address_tokens()
            .any(|t| text.starts_with(t) || text.ends_with(t))
    }

    fn is_address_field(&self, field: &str) -> bool {
        self.address_tokens().any(|t| field.contains(t))
    }

    /// Replies for one RTM event, in emission order.
    pub async fn respond(&self, event: &Event) -> Vec<Outgoing> {
        if !event.is_message() {
            return Vec::new();
        }
        let text = event.text.as_str();
        if text.contains(THANKS_TOKEN) {
            return vec![Outgoing::now(Reply::new(&event.channel, THANKS_REPLY))];
        }
        if self.is_addressed(text) {
            let fields: Vec<&str> = text.split_whitespace().collect();
            if fields.len() == 1 {
                return self.stall(&event.channel, &event.user);
            }
            let asks_commit = fields
                .iter()
                .filter(|f| !self.is_address_field(f))
                .any(|f| f.contains(COMMIT_TOKEN));
            if asks_commit {
                return vec![self.quote(&event.channel).await];
            }
            return vec![self.filler(&event.channel)];
        }
        if event.is_image_share() {
            return self.stall(&event.channel, &event.user);
        }
        Vec::new()
    }

    /// Replies for one outgoing-webhook call: commit first, then a mention of the bot, then thanks,
    /// and a filler for everything else.
    pub async fn respond_to_hook(&self, hook: &HookMessage) -> Vec<Outgoing> {
        let text = hook.text.as_str();
        if text.contains(COMMIT_TOKEN) {
            return vec![self.quote(&hook.channel).await];
        }
        let names_bot = self
            .bot_name
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.self_id.as_str()))
            .filter(|n| !n.is_empty())
            .any(|n| text.contains(n));
        if names_bot {
            return self.stall(&hook.channel, &hook.user_id);
        }
        if text.contains(THANKS_TOKEN) {
            return vec![Outgoing::now(Reply::new(&hook.channel, THANKS_REPLY))];
        }
        vec![self.filler(&hook.channel)]
    }

    /// Two replies: "wait" now, then a code addressed to `user` after the stall delay.
    fn stall(&self, channel: &str, user: &str) -> Vec<Outgoing> {
        let commuting = self.commute_hours.contains((self.hour)());
        let first = wait_text(self.random.flip(), commuting);
        let second = code_with_at(self.random.as_ref(), user);
        vec![
            Outgoing::now(Reply::new(channel, first)),
            Outgoing {
                delay: self.stall_delay,
                reply: Reply::new(channel, second),
            },
        ]
    }

    async fn quote(&self, channel: &str) -> Outgoing {
        Outgoing::now(Reply::new(channel, self.quotes.fetch().await))
    }

    fn filler(&self, channel: &str) -> Outgoing {
        let text = if self.random.flip() { FILLERS[0] } else { FILLERS[1] };
        Outgoing::now(Reply::new(channel, text))
    }
}
