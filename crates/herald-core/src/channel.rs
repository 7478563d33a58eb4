//! Channel naming and classification.
//!
//! A channel's class is derived from its name alone: presence channels start
//! with `presence-`, private channels match one of the configured private
//! patterns, everything else is public.

use serde::{Deserialize, Serialize};

/// Prefix that marks a presence channel.
pub const PRESENCE_PREFIX: &str = "presence-";

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name. Any non-empty name is accepted.
///
/// # Errors
///
/// Returns an error message if the channel name is empty.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    Ok(())
}

/// Storage key of a presence channel's member list.
#[must_use]
pub fn members_key(channel: &str) -> String {
    format!("{channel}:members")
}

/// Class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Anyone may subscribe.
    Public,
    /// Subscriptions must be authorized.
    Private,
    /// Private, and membership is tracked and shared with participants.
    Presence,
}

impl ChannelKind {
    /// Whether joining requires authorization.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

/// Name patterns used to classify channels and client events.
///
/// Patterns are globs where `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRules {
    /// Patterns of channels that require authorization.
    #[serde(default = "default_private_patterns")]
    pub private: Vec<String>,
    /// Patterns of event names clients may relay to each other.
    #[serde(default = "default_client_event_patterns")]
    pub client_events: Vec<String>,
}

fn default_private_patterns() -> Vec<String> {
    vec!["private-*".to_string(), "presence-*".to_string()]
}

fn default_client_event_patterns() -> Vec<String> {
    vec!["client-*".to_string()]
}

impl Default for ChannelRules {
    fn default() -> Self {
        Self {
            private: default_private_patterns(),
            client_events: default_client_event_patterns(),
        }
    }
}

impl ChannelRules {
    /// Classify a channel by name.
    #[must_use]
    pub fn classify(&self, channel: &str) -> ChannelKind {
        if is_presence(channel) {
            ChannelKind::Presence
        } else if self.private.iter().any(|p| glob_match(p, channel)) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Whether the channel requires authorization.
    #[must_use]
    pub fn is_private(&self, channel: &str) -> bool {
        self.classify(channel).requires_auth()
    }

    /// Whether clients may relay an event with this name.
    #[must_use]
    pub fn is_client_event(&self, event: &str) -> bool {
        self.client_events.iter().any(|p| glob_match(p, event))
    }
}

/// Whether the channel is a presence channel.
#[must_use]
pub fn is_presence(channel: &str) -> bool {
    channel.starts_with(PRESENCE_PREFIX)
}

/// Match `text` against a glob where `*` matches any (possibly empty) run.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}
