//! # Subject Naming
//!
//! Task subjects are `<prefix>.tasks.<kind>`; the stream captures everything under
//! `<prefix>.>`. Handlers register by suffix (`tasks.rss_fetch`) so the prefix stays
//! a deployment concern.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::MessagingError;
use crate::constants::consumers;

/// Pipeline stages, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    RssFetch,
    ArticleFetch,
    Summarize,
    Rank,
    Share,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::RssFetch,
        TaskKind::ArticleFetch,
        TaskKind::Summarize,
        TaskKind::Rank,
        TaskKind::Share,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RssFetch => "rss_fetch",
            Self::ArticleFetch => "article_fetch",
            Self::Summarize => "summarize",
            Self::Rank => "rank",
            Self::Share => "share",
        }
    }

    /// Subject without the namespace prefix, e.g. `tasks.rank`
    pub fn suffix(&self) -> String {
        format!("tasks.{}", self.as_str())
    }

    pub fn subject(&self, prefix: &str) -> String {
        qualify(prefix, &self.suffix())
    }

    /// Durable consumer name of the worker role that handles this kind
    pub fn default_durable(&self) -> &'static str {
        match self {
            Self::RssFetch => consumers::FETCHER_RSS,
            Self::ArticleFetch => consumers::FETCHER_ARTICLE,
            Self::Summarize => consumers::SUMMARISER,
            Self::Rank => consumers::RANKER,
            Self::Share => consumers::SHARER,
        }
    }

    /// Stage that follows this one, if any
    pub fn next(&self) -> Option<TaskKind> {
        match self {
            Self::RssFetch => Some(Self::ArticleFetch),
            Self::ArticleFetch => Some(Self::Summarize),
            Self::Summarize => Some(Self::Rank),
            Self::Rank => Some(Self::Share),
            Self::Share => None,
        }
    }

    /// Parse a full subject (`ai-radar.tasks.rank`) back into its kind
    pub fn from_subject(prefix: &str, subject: &str) -> Option<TaskKind> {
        subject
            .strip_prefix(prefix)?
            .strip_prefix(".tasks.")?
            .parse()
            .ok()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MessagingError::configuration("subjects", format!("unknown task kind: {s}")))
    }
}

/// Join a prefix and a suffix, tolerating an already-qualified suffix
pub fn qualify(prefix: &str, suffix: &str) -> String {
    if suffix == prefix || suffix.starts_with(&format!("{prefix}.")) {
        suffix.to_string()
    } else {
        format!("{prefix}.{suffix}")
    }
}

/// Subject filter set of the namespace stream
pub fn stream_subjects(prefix: &str) -> Vec<String> {
    vec![format!("{prefix}.>")]
}

/// NATS wildcard matching: `*` matches one token, a trailing `>` one or more
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return filter_tokens.next().is_none(),
            (Some("*"), Some(s)) if !s.is_empty() => {}
            (Some(f), Some(s)) if f == s && !s.is_empty() => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
